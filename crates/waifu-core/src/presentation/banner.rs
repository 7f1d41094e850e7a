use std::io::Cursor;

use anyhow::{Context, Result};
use image::imageops::FilterType;

use super::colors::{RESET, pixel_color};

const UPPER_HALF_BLOCK: char = '▀';

/// Icon sizing relative to the terminal width.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BannerOptions {
    pub width_ratio: f32,
    pub min_width: u32,
    pub max_width: u32,
    pub aspect_ratio: f32,
}

impl Default for BannerOptions {
    fn default() -> Self {
        Self {
            width_ratio: 0.5,
            min_width: 20,
            max_width: 40,
            aspect_ratio: 1.0,
        }
    }
}

/// Current terminal width in columns, 80 when it cannot be queried.
pub fn terminal_columns() -> u16 {
    crossterm::terminal::size().map_or(80, |(columns, _)| columns)
}

/// Target cell size for an image of `width` x `height` pixels.
///
/// Height is in pixels; each output row packs two of them.
pub fn banner_size(width: u32, height: u32, columns: u16, opts: &BannerOptions) -> (u32, u32) {
    let columns = u32::from(columns.max(10));
    let mut desired = columns;
    if opts.width_ratio > 0.0 {
        desired = desired.min(((columns as f32 * opts.width_ratio) as u32).max(1));
    }
    if opts.max_width > 0 {
        desired = desired.min(opts.max_width);
    }
    desired = desired.max(opts.min_width);

    let target_width = desired.min(width).max(1);
    let aspect = if width == 0 {
        1.0
    } else {
        height as f32 / width as f32
    };
    let target_height = ((target_width as f32 * aspect * opts.aspect_ratio) as u32).max(2);
    (target_width, target_height)
}

/// Renders an image as rows of colored half blocks (top pixel as foreground,
/// bottom pixel as background).
///
/// # Errors
/// Returns an error if the image cannot be decoded.
pub fn render_banner(
    image_bytes: &[u8],
    columns: u16,
    opts: &BannerOptions,
    truecolor: bool,
) -> Result<String> {
    let img = image::ImageReader::new(Cursor::new(image_bytes))
        .with_guessed_format()
        .context("Failed to detect banner image format")?
        .decode()
        .context("Failed to decode banner image")?
        .to_rgb8();

    let (width, height) = banner_size(img.width(), img.height(), columns, opts);
    let img = image::imageops::resize(&img, width, height, FilterType::Lanczos3);

    let mut out = String::new();
    for y in (0..height).step_by(2) {
        for x in 0..width {
            out.push_str(&pixel_color(38, img.get_pixel(x, y).0, truecolor));
            if y + 1 < height {
                out.push_str(&pixel_color(48, img.get_pixel(x, y + 1).0, truecolor));
            } else {
                // No lower pixel: keep the terminal background.
                out.push_str("\x1b[49m");
            }
            out.push(UPPER_HALF_BLOCK);
        }
        out.push_str(RESET);
        out.push('\n');
    }
    out.push_str(RESET);
    out.push('\n');
    Ok(out)
}
