use anyhow::{bail, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use restyle_contracts::data_url::EncodedImage;
use serde::Serialize;

const PAGE_WIDTH: u32 = 2480;
const PAGE_HEIGHT: u32 = 3508;
const BACKGROUND: Rgb<u8> = Rgb([0x11, 0x18, 0x27]);
const GRID_COLS: u32 = 3;
const GRID_ROWS: u32 = 4;
const GRID_PADDING: f64 = 80.0;
const HEADER_HEIGHT: f64 = 350.0;
const IMAGE_SHARE: f64 = 0.8;
const JPEG_QUALITY: u8 = 92;

pub const ALBUM_CAPACITY: usize = (GRID_COLS * GRID_ROWS) as usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumEntry {
    pub caption: String,
    pub image: EncodedImage,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlbumCell {
    pub caption: String,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Top of the caption band under the image.
    pub caption_y: u32,
}

/// Where everything landed on the page. Text is not drawn on the page
/// itself, so captions and title travel here.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlbumManifest {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub cells: Vec<AlbumCell>,
    pub omitted: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Album {
    pub image: EncodedImage,
    pub manifest: AlbumManifest,
}

/// Lays finished images out on a dark A4-ratio page, three across and four
/// down, each fitted into the top 80% of its cell. Entries past the grid's
/// capacity are listed in `omitted`.
pub fn compose_album(entries: &[AlbumEntry], title: &str) -> Result<Album> {
    if entries.is_empty() {
        bail!("album needs at least one finished image");
    }

    let content_width = PAGE_WIDTH as f64 - GRID_PADDING * 2.0;
    let content_height = PAGE_HEIGHT as f64 - HEADER_HEIGHT - GRID_PADDING;
    let cell_width = (content_width - GRID_PADDING * (GRID_COLS - 1) as f64) / GRID_COLS as f64;
    let cell_height = (content_height - GRID_PADDING * (GRID_ROWS - 1) as f64) / GRID_ROWS as f64;
    let image_area_height = cell_height * IMAGE_SHARE;

    let mut page = RgbImage::from_pixel(PAGE_WIDTH, PAGE_HEIGHT, BACKGROUND);
    let mut cells = Vec::new();
    for (index, entry) in entries.iter().take(ALBUM_CAPACITY).enumerate() {
        let bytes = entry.image.decode_bytes()?;
        let source = image::load_from_memory(&bytes)
            .with_context(|| format!("album image '{}' could not be decoded", entry.caption))?
            .to_rgb8();
        if source.width() == 0 || source.height() == 0 {
            bail!("album image '{}' is empty", entry.caption);
        }

        let aspect = source.width() as f64 / source.height() as f64;
        let mut draw_width = cell_width;
        let mut draw_height = draw_width / aspect;
        if draw_height > image_area_height {
            draw_height = image_area_height;
            draw_width = draw_height * aspect;
        }

        let row = (index as u32 / GRID_COLS) as f64;
        let col = (index as u32 % GRID_COLS) as f64;
        let cell_x = GRID_PADDING + col * (cell_width + GRID_PADDING);
        let cell_y = HEADER_HEIGHT + row * (cell_height + GRID_PADDING);
        let x = (cell_x + (cell_width - draw_width) / 2.0).round() as u32;
        let y = (cell_y + (image_area_height - draw_height) / 2.0).round() as u32;
        let width = draw_width.round().max(1.0) as u32;
        let height = draw_height.round().max(1.0) as u32;

        let scaled = imageops::resize(&source, width, height, FilterType::Triangle);
        imageops::overlay(&mut page, &scaled, x as i64, y as i64);
        cells.push(AlbumCell {
            caption: entry.caption.clone(),
            x,
            y,
            width,
            height,
            caption_y: (cell_y + image_area_height + 30.0).round() as u32,
        });
    }

    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY)
        .encode_image(&page)
        .context("album JPEG encoding failed")?;
    let image = EncodedImage::from_bytes("image/jpeg", &bytes)?;

    Ok(Album {
        image,
        manifest: AlbumManifest {
            title: title.to_string(),
            width: PAGE_WIDTH,
            height: PAGE_HEIGHT,
            cells,
            omitted: entries
                .iter()
                .skip(ALBUM_CAPACITY)
                .map(|entry| entry.caption.clone())
                .collect(),
        },
    })
}
