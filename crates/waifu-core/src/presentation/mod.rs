//! Terminal presentation helpers: colors, face glyphs and the persona banner.
//!
//! Everything here is a pure function of its inputs; terminal capability
//! checks happen at the call site.

mod banner;
mod colors;
mod faces;

pub use banner::{BannerOptions, banner_size, render_banner, terminal_columns};
pub use colors::{
    BOLD, ITALIC, Palette, PaletteColors, RESET, rgb_to_ansi256, to_safe_color,
};
pub use faces::Faces;
