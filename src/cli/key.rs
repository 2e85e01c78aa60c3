//! `krofi key`: print the cache key for a request.

use anyhow::Result;

use krofi::cache::{derive, ImageIdentity};
use krofi::codec::TransformParams;

pub(crate) fn cmd_key(
    url: &str,
    width: Option<u32>,
    height: Option<u32>,
    blur: Option<f32>,
    grayscale: bool,
) -> Result<()> {
    let identity = ImageIdentity::parse(
        url,
        TransformParams {
            width,
            height,
            blur,
            grayscale,
        },
    )?;
    println!("{}", derive(&identity));
    Ok(())
}
