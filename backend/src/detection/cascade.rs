//! OpenCV Haar cascades evaluated over integral images.
//!
//! Cascades are read from the `opencv-cascade-classifier` XML files that ship
//! with OpenCV (`haarcascade_frontalface_default.xml`, `haarcascade_eye.xml`,
//! ...). Boosted Haar cascades with upright features are supported; LBP and
//! tilted-feature cascades are rejected at load time.
//!
//! The scan mirrors `CascadeClassifier::detectMultiScale`. The image is shrunk
//! by `scale_factor` per pyramid level while the base window stays fixed, and
//! the window steps 2 pixels (1 once the level is scaled down more than 2x).
//! A window rejected by the first stage also skips the next position.

use image::{GrayImage, Luma};
use quick_xml::Reader;
use quick_xml::events::Event as XmlEvent;
use std::path::Path;
use std::str::FromStr;

use super::grouping::{GROUP_EPS, group_regions};
use super::{Region, RegionDetector, ScanParams};
use crate::error::DetectionError;

#[derive(Debug, Clone, PartialEq)]
pub struct HaarCascade {
    /// Base window as `(width, height)`.
    pub window: (u32, u32),
    pub stages: Vec<Stage>,
    pub features: Vec<HaarFeature>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stage {
    pub threshold: f64,
    pub classifiers: Vec<WeakClassifier>,
}

/// A small decision tree over features. A child index `<= 0` selects
/// `leaves[-index]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeakClassifier {
    pub nodes: Vec<Node>,
    pub leaves: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Node {
    pub left: i32,
    pub right: i32,
    pub feature: usize,
    pub threshold: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HaarFeature {
    pub rects: Vec<WeightedRect>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub weight: f64,
}

fn invalid(reason: impl Into<String>) -> DetectionError {
    DetectionError::InvalidCascade(reason.into())
}

fn parse_token<T: FromStr>(token: &str, what: &str) -> Result<T, DetectionError> {
    token
        .parse()
        .map_err(|_| invalid(format!("bad {} value {:?}", what, token)))
}

fn parse_tokens<T: FromStr>(text: &str, what: &str) -> Result<Vec<T>, DetectionError> {
    text.split_whitespace()
        .map(|token| parse_token(token, what))
        .collect()
}

fn current<'a, T>(items: &'a mut [T], what: &str) -> Result<&'a mut T, DetectionError> {
    items
        .last_mut()
        .ok_or_else(|| invalid(format!("{} outside of its list", what)))
}

impl HaarCascade {
    pub fn from_xml_str(xml: &str) -> Result<Self, DetectionError> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut path: Vec<String> = Vec::new();
        let mut stage_type: Option<String> = None;
        let mut feature_type: Option<String> = None;
        let mut window = (0u32, 0u32);
        let mut stages: Vec<Stage> = Vec::new();
        let mut features: Vec<HaarFeature> = Vec::new();

        loop {
            match reader.read_event()? {
                XmlEvent::Start(ref e) => {
                    let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    if tag == "_" {
                        match path.last().map(String::as_str) {
                            Some("stages") => stages.push(Stage::default()),
                            Some("weakClassifiers") => current(&mut stages, "weak classifier")?
                                .classifiers
                                .push(WeakClassifier::default()),
                            Some("features") => features.push(HaarFeature::default()),
                            _ => {}
                        }
                    }
                    path.push(tag);
                }
                XmlEvent::End(_) => {
                    path.pop();
                }
                XmlEvent::Text(ref e) => {
                    let text = e.unescape()?;
                    let text = text.trim();
                    let names: Vec<&str> = path.iter().map(String::as_str).collect();
                    match names.as_slice() {
                        [.., "cascade", "stageType"] => stage_type = Some(text.to_string()),
                        [.., "cascade", "featureType"] => feature_type = Some(text.to_string()),
                        [.., "cascade", "width"] => window.0 = parse_token(text, "width")?,
                        [.., "cascade", "height"] => window.1 = parse_token(text, "height")?,
                        [.., "featureParams", "maxCatCount"] => {
                            if parse_token::<u32>(text, "maxCatCount")? != 0 {
                                return Err(invalid("categorical features are not supported"));
                            }
                        }
                        [.., "stages", "_", "stageThreshold"] => {
                            current(&mut stages, "stage threshold")?.threshold =
                                parse_token(text, "stage threshold")?;
                        }
                        [.., "weakClassifiers", "_", "internalNodes"] => {
                            let tokens: Vec<&str> = text.split_whitespace().collect();
                            if tokens.is_empty() || tokens.len() % 4 != 0 {
                                return Err(invalid(format!("malformed internal nodes {:?}", text)));
                            }
                            let stage = current(&mut stages, "internal nodes")?;
                            let classifier = current(&mut stage.classifiers, "internal nodes")?;
                            for node in tokens.chunks(4) {
                                classifier.nodes.push(Node {
                                    left: parse_token(node[0], "node")?,
                                    right: parse_token(node[1], "node")?,
                                    feature: parse_token(node[2], "feature index")?,
                                    threshold: parse_token(node[3], "node threshold")?,
                                });
                            }
                        }
                        [.., "weakClassifiers", "_", "leafValues"] => {
                            let stage = current(&mut stages, "leaf values")?;
                            current(&mut stage.classifiers, "leaf values")?.leaves =
                                parse_tokens(text, "leaf")?;
                        }
                        [.., "features", "_", "rects", "_"] => {
                            let values: Vec<f64> = parse_tokens(text, "rect")?;
                            let [x, y, width, height, weight] = values[..] else {
                                return Err(invalid(format!("malformed rect {:?}", text)));
                            };
                            let corner = [x, y, width, height];
                            if corner.iter().any(|v| *v < 0.0 || v.fract() != 0.0) {
                                return Err(invalid(format!("malformed rect {:?}", text)));
                            }
                            current(&mut features, "rect")?.rects.push(WeightedRect {
                                x: x as u32,
                                y: y as u32,
                                width: width as u32,
                                height: height as u32,
                                weight,
                            });
                        }
                        [.., "features", "_", "tilted"] => {
                            if text != "0" {
                                return Err(invalid("tilted features are not supported"));
                            }
                        }
                        _ => {}
                    }
                }
                XmlEvent::Eof => break,
                _ => {}
            }
        }

        if stage_type.as_deref() != Some("BOOST") {
            return Err(invalid(format!(
                "expected a boosted opencv-cascade-classifier, found stage type {:?}",
                stage_type
            )));
        }
        if feature_type.as_deref() != Some("HAAR") {
            return Err(invalid(format!(
                "expected HAAR features, found {:?}",
                feature_type
            )));
        }

        let cascade = HaarCascade {
            window,
            stages,
            features,
        };
        cascade.validate()?;
        Ok(cascade)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, DetectionError> {
        let path = path.as_ref();
        let xml = std::fs::read_to_string(path).map_err(|source| DetectionError::CascadeIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_xml_str(&xml)
    }

    pub fn validate(&self) -> Result<(), DetectionError> {
        let (window_width, window_height) = self.window;
        if window_width < 3 || window_height < 3 {
            return Err(invalid(format!(
                "base window {}x{} is too small",
                window_width, window_height
            )));
        }
        if self.stages.is_empty() {
            return Err(invalid("no stages"));
        }

        for (s, stage) in self.stages.iter().enumerate() {
            if stage.classifiers.is_empty() || !stage.threshold.is_finite() {
                return Err(invalid(format!("stage {} is malformed", s)));
            }
            for (c, classifier) in stage.classifiers.iter().enumerate() {
                let malformed = || invalid(format!("stage {} classifier {} is malformed", s, c));
                if classifier.nodes.is_empty() || classifier.leaves.iter().any(|l| !l.is_finite()) {
                    return Err(malformed());
                }
                for (n, node) in classifier.nodes.iter().enumerate() {
                    if node.feature >= self.features.len() || !node.threshold.is_finite() {
                        return Err(malformed());
                    }
                    // Children point forward in the node list or at a leaf.
                    for child in [node.left, node.right] {
                        let valid = if child > 0 {
                            (child as usize) > n && (child as usize) < classifier.nodes.len()
                        } else {
                            (child.unsigned_abs() as usize) < classifier.leaves.len()
                        };
                        if !valid {
                            return Err(malformed());
                        }
                    }
                }
            }
        }

        for (f, feature) in self.features.iter().enumerate() {
            if feature.rects.is_empty() || feature.rects.len() > 3 {
                return Err(invalid(format!("feature {} has {} rects", f, feature.rects.len())));
            }
            for rect in &feature.rects {
                let inside = rect.width > 0
                    && rect.height > 0
                    && rect.x + rect.width <= window_width
                    && rect.y + rect.height <= window_height;
                if !inside || !rect.weight.is_finite() {
                    return Err(invalid(format!(
                        "feature {} has rect {:?} outside the {}x{} window",
                        f, rect, window_width, window_height
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Summed-area tables of intensities and squared intensities.
struct IntegralImage {
    stride: usize,
    sum: Vec<u64>,
    squared: Vec<u64>,
}

impl IntegralImage {
    fn new(gray: &GrayImage) -> Self {
        let (width, height) = gray.dimensions();
        let stride = width as usize + 1;
        let mut sum = vec![0u64; stride * (height as usize + 1)];
        let mut squared = vec![0u64; sum.len()];

        for y in 0..height as usize {
            let mut row_sum = 0u64;
            let mut row_squared = 0u64;
            for x in 0..width as usize {
                let value = u64::from(gray.get_pixel(x as u32, y as u32).0[0]);
                row_sum += value;
                row_squared += value * value;
                sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row_sum;
                squared[(y + 1) * stride + x + 1] = squared[y * stride + x + 1] + row_squared;
            }
        }
        Self {
            stride,
            sum,
            squared,
        }
    }

    fn rect(table: &[u64], stride: usize, x: u32, y: u32, width: u32, height: u32) -> u64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + width as usize, y0 + height as usize);
        table[y1 * stride + x1] + table[y0 * stride + x0]
            - table[y0 * stride + x1]
            - table[y1 * stride + x0]
    }

    fn sum(&self, x: u32, y: u32, width: u32, height: u32) -> u64 {
        Self::rect(&self.sum, self.stride, x, y, width, height)
    }

    fn squared_sum(&self, x: u32, y: u32, width: u32, height: u32) -> u64 {
        Self::rect(&self.squared, self.stride, x, y, width, height)
    }
}

/// Rounds half to even, like OpenCV's `cvRound`.
fn cv_round(value: f64) -> u32 {
    value.round_ties_even() as u32
}

/// Bilinear resample with half-pixel alignment and clamped edges.
fn resize_linear(gray: &GrayImage, width: u32, height: u32) -> GrayImage {
    let (source_width, source_height) = gray.dimensions();
    let columns: Vec<(u32, u32, f64)> = (0..width)
        .map(|x| source_taps(x, source_width, width))
        .collect();
    let rows: Vec<(u32, u32, f64)> = (0..height)
        .map(|y| source_taps(y, source_height, height))
        .collect();

    GrayImage::from_fn(width, height, |x, y| {
        let (x0, x1, fx) = columns[x as usize];
        let (y0, y1, fy) = rows[y as usize];
        let pixel = |x, y| f64::from(gray.get_pixel(x, y).0[0]);
        let top = pixel(x0, y0) * (1.0 - fx) + pixel(x1, y0) * fx;
        let bottom = pixel(x0, y1) * (1.0 - fx) + pixel(x1, y1) * fx;
        Luma([(top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8])
    })
}

fn source_taps(dst: u32, source_len: u32, dst_len: u32) -> (u32, u32, f64) {
    let scale = f64::from(source_len) / f64::from(dst_len);
    let position = (f64::from(dst) + 0.5) * scale - 0.5;
    let last = f64::from(source_len - 1);
    let (index, frac) = if position < 0.0 {
        (0.0, 0.0)
    } else if position.floor() >= last {
        (last, 0.0)
    } else {
        (position.floor(), position - position.floor())
    };
    let index = index as u32;
    (index, (index + 1).min(source_len - 1), frac)
}

enum Verdict {
    Accepted,
    Rejected { stage: usize },
}

#[derive(Debug, Clone)]
pub struct CascadeDetector {
    name: String,
    cascade: HaarCascade,
    params: ScanParams,
}

impl CascadeDetector {
    pub fn new(
        name: impl Into<String>,
        cascade: HaarCascade,
        params: ScanParams,
    ) -> Result<Self, DetectionError> {
        cascade.validate()?;
        params.validate()?;
        Ok(Self {
            name: name.into(),
            cascade,
            params,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> ScanParams {
        self.params
    }

    /// Raw accepted windows in source-image coordinates, before grouping.
    pub fn scan(&self, gray: &GrayImage) -> Vec<Region> {
        let (width, height) = gray.dimensions();
        let (base_width, base_height) = self.cascade.window;
        let mut candidates = Vec::new();

        let mut factor = 1.0f64;
        loop {
            let level_width = cv_round(f64::from(width) / factor);
            let level_height = cv_round(f64::from(height) / factor);
            if level_width <= base_width || level_height <= base_height {
                break;
            }
            let window_width = cv_round(f64::from(base_width) * factor);
            let window_height = cv_round(f64::from(base_height) * factor);

            let resized = (level_width != width || level_height != height)
                .then(|| resize_linear(gray, level_width, level_height));
            let integral = IntegralImage::new(resized.as_ref().unwrap_or(gray));
            let step: u32 = if factor > 2.0 { 1 } else { 2 };

            for y in (0..=level_height - base_height).step_by(step as usize) {
                let mut x = 0;
                while x <= level_width - base_width {
                    match self.run_at(&integral, x, y) {
                        Verdict::Accepted => candidates.push(Region::new(
                            cv_round(f64::from(x) * factor),
                            cv_round(f64::from(y) * factor),
                            window_width,
                            window_height,
                        )),
                        Verdict::Rejected { stage: 0 } => x += step,
                        Verdict::Rejected { .. } => {}
                    }
                    x += step;
                }
            }
            factor *= self.params.scale_factor;
        }
        candidates
    }

    fn run_at(&self, integral: &IntegralImage, x: u32, y: u32) -> Verdict {
        let (width, height) = self.cascade.window;
        let inner_area = f64::from((width - 2) * (height - 2));
        let inner_sum = integral.sum(x + 1, y + 1, width - 2, height - 2) as f64;
        let inner_squared = integral.squared_sum(x + 1, y + 1, width - 2, height - 2) as f64;
        let spread = inner_area * inner_squared - inner_sum * inner_sum;
        let norm = if spread > 0.0 { spread.sqrt() } else { 1.0 };

        let feature_value = |index: usize| {
            let weighted: f64 = self.cascade.features[index]
                .rects
                .iter()
                .map(|r| r.weight * integral.sum(x + r.x, y + r.y, r.width, r.height) as f64)
                .sum();
            weighted / norm
        };

        for (s, stage) in self.cascade.stages.iter().enumerate() {
            let mut total = 0.0;
            for classifier in &stage.classifiers {
                let mut index = 0usize;
                total += loop {
                    let node = &classifier.nodes[index];
                    let next = if feature_value(node.feature) < node.threshold {
                        node.left
                    } else {
                        node.right
                    };
                    if next <= 0 {
                        break classifier.leaves[next.unsigned_abs() as usize];
                    }
                    index = next as usize;
                };
            }
            if total < stage.threshold {
                return Verdict::Rejected { stage: s };
            }
        }
        Verdict::Accepted
    }
}

impl RegionDetector for CascadeDetector {
    fn detect(&self, gray: &GrayImage) -> Result<Vec<Region>, DetectionError> {
        let candidates = self.scan(gray);
        let grouped = group_regions(&candidates, self.params.min_neighbors, GROUP_EPS);
        log::trace!(
            "{}: {} raw windows, {} regions",
            self.name,
            candidates.len(),
            grouped.len()
        );
        Ok(grouped)
    }
}
