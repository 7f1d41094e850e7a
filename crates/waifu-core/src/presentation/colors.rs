use std::fmt::Write as _;

pub const RESET: &str = "\x1b[0m";
pub const BOLD: &str = "\x1b[1m";
pub const ITALIC: &str = "\x1b[3m";

const CUBE_LEVELS: [i32; 6] = [0, 95, 135, 175, 215, 255];

/// Nearest xterm-256 index: 6x6x6 cube or 24-step grayscale ramp, whichever is closer.
pub fn rgb_to_ansi256(red: u8, green: u8, blue: u8) -> u8 {
    let (r, g, b) = (i32::from(red), i32::from(green), i32::from(blue));
    let level = |c: i32| ((f64::from(c) / 255.0 * 5.0).round() as i32).clamp(0, 5);
    let (ri, gi, bi) = (level(r), level(g), level(b));

    let distance = |lr: i32, lg: i32, lb: i32| (lr - r).pow(2) + (lg - g).pow(2) + (lb - b).pow(2);
    let cube_distance = distance(
        CUBE_LEVELS[ri as usize],
        CUBE_LEVELS[gi as usize],
        CUBE_LEVELS[bi as usize],
    );
    let cube_index = 16 + 36 * ri + 6 * gi + bi;

    let (gray_offset, gray_distance) = (0..24)
        .map(|i| {
            let level = 8 + i * 10;
            (i, distance(level, level, level))
        })
        .min_by_key(|&(i, d)| (d, i))
        .unwrap_or((0, i32::MAX));

    if gray_distance < cube_distance {
        (232 + gray_offset) as u8
    } else {
        cube_index as u8
    }
}

/// Downgrades `38;2;r;g;b` / `48;2;r;g;b` segments of an SGR sequence to
/// 256-color form unless `truecolor` is set.
///
/// Anything that is not a well-formed `ESC [ ... m` sequence, or whose
/// components fail to parse, is returned unchanged.
pub fn to_safe_color(seq: &str, truecolor: bool) -> String {
    if truecolor {
        return seq.to_string();
    }
    let Some(body) = seq.strip_prefix("\x1b[").and_then(|s| s.strip_suffix('m')) else {
        return seq.to_string();
    };

    let segments: Vec<&str> = body.split(';').collect();
    let mut out: Vec<String> = Vec::with_capacity(segments.len());
    let mut converted = false;
    let mut i = 0;
    while i < segments.len() {
        let seg = segments[i];
        if matches!(seg, "38" | "48") && i + 4 < segments.len() && segments[i + 1] == "2" {
            let rgb: Option<Vec<u8>> = segments[i + 2..=i + 4]
                .iter()
                .map(|s| s.parse::<u8>().ok())
                .collect();
            let Some(rgb) = rgb else {
                return seq.to_string();
            };
            out.extend([
                seg.to_string(),
                "5".to_string(),
                rgb_to_ansi256(rgb[0], rgb[1], rgb[2]).to_string(),
            ]);
            converted = true;
            i += 5;
        } else {
            out.push(seg.to_string());
            i += 1;
        }
    }

    if converted {
        format!("\x1b[{}m", out.join(";"))
    } else {
        seq.to_string()
    }
}

/// Foreground/background escape for one pixel.
pub(crate) fn pixel_color(layer: u8, [r, g, b]: [u8; 3], truecolor: bool) -> String {
    let mut s = String::new();
    if truecolor {
        let _ = write!(s, "\x1b[{layer};2;{r};{g};{b}m");
    } else {
        let _ = write!(s, "\x1b[{layer};5;{}m", rgb_to_ansi256(r, g, b));
    }
    s
}

/// Escape sequences used by the session output, resolved once.
///
/// Every field is empty when colors are disabled, so rendering code can
/// interpolate unconditionally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Palette {
    pub bold: String,
    pub italic: String,
    pub reset: String,
    pub assistant_label: String,
    pub user_label: String,
    pub face: String,
    pub status: String,
    pub interrupted: String,
    pub error: String,
}

/// Configured SGR parameters, e.g. `38;2;255;64;160`.
#[derive(Debug, Clone, Copy)]
pub struct PaletteColors<'a> {
    pub assistant_label: &'a str,
    pub user_label: &'a str,
    pub face: &'a str,
}

impl Palette {
    /// All-empty palette for non-terminal output.
    pub fn plain() -> Self {
        Self::default()
    }

    pub fn resolve(colors: PaletteColors<'_>, truecolor: bool) -> Self {
        let sgr = |params: &str| to_safe_color(&format!("\x1b[{params}m"), truecolor);
        Self {
            bold: BOLD.to_string(),
            italic: ITALIC.to_string(),
            reset: RESET.to_string(),
            assistant_label: sgr(colors.assistant_label),
            user_label: sgr(colors.user_label),
            face: sgr(colors.face),
            status: sgr("38;2;102;102;102"),
            interrupted: sgr("90"),
            error: sgr("31"),
        }
    }
}
