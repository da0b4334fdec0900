use std::io::Cursor;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use image::imageops::{self, FilterType};
use image::{ImageFormat, Rgba, RgbaImage};

use crate::error::Result;
use crate::types::RenderMode;

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Axis-aligned rectangle in canvas pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

/// One render of a batch and where it sits in the output grid.
#[derive(Debug, Clone)]
pub struct BatchImage {
    pub seed: i64,
    /// Encoded image exactly as returned by the server.
    pub bytes: Vec<u8>,
    pub rect: Rect,
}

/// Decode a base64 image string from an API response.
pub fn decode_b64(data: &str) -> Result<Vec<u8>> {
    Ok(BASE64.decode(data.trim())?)
}

/// Encode an image as PNG bytes.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

/// Encode an image as a base64 PNG string.
pub fn encode_png_b64(image: &RgbaImage) -> Result<String> {
    Ok(BASE64.encode(encode_png(image)?))
}

/// Decode encoded image bytes into RGBA pixels.
pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage> {
    Ok(image::load_from_memory(bytes)?.to_rgba8())
}

fn fit(image: RgbaImage, width: u32, height: u32) -> RgbaImage {
    if image.dimensions() == (width, height) {
        image
    } else {
        imageops::resize(&image, width.max(1), height.max(1), FilterType::Triangle)
    }
}

/// The shared bitmap.
///
/// In sketch mode the canvas holds two regions of `region_width x height`
/// side by side: the output region at `(0, 0)` receives server renders and
/// the sketch region at `(region_width, 0)` holds the user's strokes. In
/// img2img mode there is a single region.
#[derive(Debug, Clone)]
pub struct Canvas {
    image: RgbaImage,
    region_width: u32,
    height: u32,
    mode: RenderMode,
    batch: Vec<BatchImage>,
    last_render: Option<Vec<u8>>,
}

impl Canvas {
    /// White canvas for regions of `region_width x height`.
    pub fn new(region_width: u32, height: u32, mode: RenderMode) -> Self {
        let region_width = region_width.max(1);
        let height = height.max(1);
        let regions = match mode {
            RenderMode::Txt2Img => 2,
            RenderMode::Img2Img => 1,
        };
        Self {
            image: RgbaImage::from_pixel(region_width * regions, height, WHITE),
            region_width,
            height,
            mode,
            batch: Vec::new(),
            last_render: None,
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Mutable pixels, for stroke rendering by a front end.
    pub fn image_mut(&mut self) -> &mut RgbaImage {
        &mut self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn region_width(&self) -> u32 {
        self.region_width
    }

    pub fn output_rect(&self) -> Rect {
        Rect::new(0, 0, self.region_width, self.height)
    }

    /// Sketch region. Coincides with the output region in img2img mode.
    pub fn sketch_rect(&self) -> Rect {
        match self.mode {
            RenderMode::Txt2Img => Rect::new(self.region_width, 0, self.region_width, self.height),
            RenderMode::Img2Img => self.output_rect(),
        }
    }

    fn crop(&self, rect: Rect) -> RgbaImage {
        imageops::crop_imm(&self.image, rect.x, rect.y, rect.width, rect.height).to_image()
    }

    fn replace(&mut self, image: &RgbaImage, x: u32, y: u32) {
        imageops::replace(&mut self.image, image, x as i64, y as i64);
    }

    pub fn sketch_image(&self) -> RgbaImage {
        self.crop(self.sketch_rect())
    }

    pub fn output_image(&self) -> RgbaImage {
        self.crop(self.output_rect())
    }

    /// Wipe the sketch region to white.
    pub fn clear_sketch(&mut self) {
        let rect = self.sketch_rect();
        let blank = RgbaImage::from_pixel(rect.width, rect.height, WHITE);
        self.replace(&blank, rect.x, rect.y);
    }

    /// Place an image in the sketch region, scaling it only when its size
    /// differs from the region.
    pub fn set_sketch(&mut self, sketch: RgbaImage) {
        let rect = self.sketch_rect();
        let sketch = fit(sketch, rect.width, rect.height);
        self.replace(&sketch, rect.x, rect.y);
    }

    /// Load an image file into the sketch region.
    pub fn load_sketch(&mut self, path: &Path) -> Result<()> {
        let sketch = image::open(path)?.to_rgba8();
        self.set_sketch(sketch);
        Ok(())
    }

    /// Sketch region as a base64 PNG for the first ControlNet unit.
    ///
    /// With `invert` the colours are flipped locally first (white strokes on
    /// black), for servers not running the `invert` preprocessor.
    pub fn encode_sketch(&self, invert: bool) -> Result<String> {
        let mut sketch = self.sketch_image();
        if invert {
            imageops::invert(&mut sketch);
        }
        encode_png_b64(&sketch)
    }

    /// Bytes of the last render applied to the output region.
    pub fn last_render(&self) -> Option<&[u8]> {
        self.last_render.as_deref()
    }

    pub fn batch_images(&self) -> &[BatchImage] {
        &self.batch
    }

    /// Replace the output region with a single render.
    pub fn apply_single(&mut self, bytes: Vec<u8>) -> Result<()> {
        let render = decode_image(&bytes)?;
        let rect = self.output_rect();
        let render = fit(render, rect.width, rect.height);
        self.replace(&render, rect.x, rect.y);
        self.batch.clear();
        self.last_render = Some(bytes);
        Ok(())
    }

    /// Tile a batch into a `ceil(sqrt(n))` square grid over the output
    /// region. Image `k` gets seed `base_seed + k`.
    pub fn apply_batch(&mut self, images: Vec<Vec<u8>>, base_seed: i64) -> Result<()> {
        if images.is_empty() {
            return Ok(());
        }
        let decoded = images
            .iter()
            .map(|b| decode_image(b))
            .collect::<Result<Vec<_>>>()?;

        let cells = grid_cells(images.len(), self.region_width, self.height);
        let mut batch = Vec::with_capacity(images.len());
        for (k, ((bytes, render), rect)) in images.into_iter().zip(decoded).zip(cells).enumerate() {
            let tile = fit(render, rect.width, rect.height);
            self.replace(&tile, rect.x, rect.y);
            batch.push(BatchImage {
                seed: base_seed + k as i64,
                bytes,
                rect,
            });
        }

        self.last_render = batch.first().map(|b| b.bytes.clone());
        self.batch = batch;
        Ok(())
    }

    /// Batch cell under a canvas position.
    pub fn batch_at(&self, x: u32, y: u32) -> Option<&BatchImage> {
        self.batch.iter().find(|b| b.rect.contains(x, y))
    }

    /// Promote the batch image under `(x, y)` to the single output render.
    /// Returns its seed.
    pub fn select_batch_at(&mut self, x: u32, y: u32) -> Result<Option<i64>> {
        let Some(picked) = self.batch_at(x, y).cloned() else {
            return Ok(None);
        };
        self.apply_single(picked.bytes)?;
        Ok(Some(picked.seed))
    }

    /// Output region inverted and encoded, ready for a detector request.
    /// Returns the image with its width and height.
    pub fn detect_input(&self) -> Result<(String, u32, u32)> {
        let mut output = self.output_image();
        imageops::invert(&mut output);
        let (w, h) = output.dimensions();
        Ok((encode_png_b64(&output)?, w, h))
    }

    /// Write a detector result (black lines on white after inversion) into
    /// the sketch region.
    pub fn apply_detect_result(&mut self, image_b64: &str) -> Result<()> {
        let mut detected = decode_image(&decode_b64(image_b64)?)?;
        imageops::invert(&mut detected);
        for pixel in detected.pixels_mut() {
            pixel.0[3] = 255;
        }
        self.set_sketch(detected);
        Ok(())
    }
}

/// Placement of `n` batch images over a `width x height` region.
pub fn grid_cells(n: usize, width: u32, height: u32) -> Vec<Rect> {
    if n == 0 {
        return Vec::new();
    }
    let nb = (n as f64).sqrt().ceil() as u32;
    let cell_w = (width / nb).max(1);
    let cell_h = (height / nb).max(1);
    (0..n as u32)
        .map(|k| {
            let (i, j) = (k % nb, k / nb);
            Rect::new(i * width / nb, j * height / nb, cell_w, cell_h)
        })
        .collect()
}
