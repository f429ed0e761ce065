//! Layout engine boundary.
//!
//! Segmentation does not detect regions itself: it hands each page to a
//! [`LayoutEngine`] and receives labelled boxes with their cropped pixels.
//! The engine's own output order is irrelevant, since segmentation re-sorts
//! by vertical position.
//!
//! [`RemoteLayoutEngine`] talks to a layout detection service over HTTP:
//!
//! ```text
//! POST <url>   {"image": "<base64 PNG>"}
//! 200          {"regions": [{"type": "text", "bbox": [x0, y0, x1, y1]}, …]}
//! ```
//!
//! and cuts the crops locally from the page it sent.

use crate::error::LayoutError;
use crate::pipeline::encode::encode_png_base64;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Axis-aligned box in page pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BoundingBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Top edge, the key segmentation sorts by.
    pub fn top(&self) -> f32 {
        self.y0.min(self.y1)
    }

    /// Integer pixel rectangle `(x, y, width, height)` clipped to a
    /// `width × height` page; `None` if nothing is left.
    pub fn clip(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let clamp = |v: f32, max: u32| -> u32 {
            if v.is_nan() {
                0
            } else {
                v.clamp(0.0, max as f32) as u32
            }
        };
        let x0 = clamp(self.x0.min(self.x1).floor(), width);
        let y0 = clamp(self.y0.min(self.y1).floor(), height);
        let x1 = clamp(self.x0.max(self.x1).ceil(), width);
        let y1 = clamp(self.y0.max(self.y1).ceil(), height);
        (x1 > x0 && y1 > y0).then(|| (x0, y0, x1 - x0, y1 - y0))
    }
}

/// One detected region.
#[derive(Debug, Clone)]
pub struct LayoutRegion {
    /// Raw engine label, e.g. `"text"`, `"table"`, `"header"`.
    pub label: String,
    pub bbox: BoundingBox,
    pub crop: DynamicImage,
}

/// A layout detector.
///
/// Called from a blocking worker thread, one page at a time.
pub trait LayoutEngine: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str {
        "layout"
    }

    /// Detect regions on a decoded page.
    fn detect(&self, page: &DynamicImage) -> Result<Vec<LayoutRegion>, LayoutError>;
}

#[derive(Serialize)]
struct LayoutRequest<'a> {
    image: &'a str,
}

#[derive(Deserialize)]
struct LayoutResponse {
    regions: Vec<RemoteRegion>,
}

#[derive(Deserialize)]
struct RemoteRegion {
    #[serde(rename = "type")]
    label: String,
    bbox: [f32; 4],
}

/// Layout engine behind an HTTP JSON endpoint.
pub struct RemoteLayoutEngine {
    url: String,
    client: reqwest::blocking::Client,
}

impl RemoteLayoutEngine {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, LayoutError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LayoutError::Request(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl LayoutEngine for RemoteLayoutEngine {
    fn name(&self) -> &str {
        "remote"
    }

    fn detect(&self, page: &DynamicImage) -> Result<Vec<LayoutRegion>, LayoutError> {
        let b64 = encode_png_base64(page)?;
        let response = self
            .client
            .post(&self.url)
            .json(&LayoutRequest { image: &b64 })
            .send()
            .map_err(|e| LayoutError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LayoutError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: LayoutResponse = response
            .json()
            .map_err(|e| LayoutError::InvalidResponse(e.to_string()))?;
        debug!("{} returned {} regions", self.url, parsed.regions.len());
        Ok(crop_regions(page, parsed.regions))
    }
}

fn crop_regions(page: &DynamicImage, regions: Vec<RemoteRegion>) -> Vec<LayoutRegion> {
    let (w, h) = (page.width(), page.height());
    regions
        .into_iter()
        .filter_map(|r| {
            let [x0, y0, x1, y1] = r.bbox;
            let bbox = BoundingBox::new(x0, y0, x1, y1);
            match bbox.clip(w, h) {
                Some((x, y, cw, ch)) => Some(LayoutRegion {
                    label: r.label,
                    bbox,
                    crop: page.crop_imm(x, y, cw, ch),
                }),
                None => {
                    warn!("Dropping empty '{}' region {:?}", r.label, r.bbox);
                    None
                }
            }
        })
        .collect()
}
