//! `waifu devices`: list audio devices.

use anyhow::{Context, Result};
use waifu_core::audio;

pub fn list() -> Result<()> {
    let (devices, default_index) =
        audio::list_output_devices().context("enumerate audio devices")?;
    if devices.is_empty() {
        println!("No audio devices found.");
        return Ok(());
    }

    for device in &devices {
        let marker = if Some(device.index) == default_index {
            " [default]"
        } else {
            ""
        };
        println!(
            "{}: {} ({} out channels){marker}",
            device.index, device.name, device.output_channels
        );
    }
    Ok(())
}
