//! Batch result outputs: an append-only CSV log of every rule outcome and
//! one annotated image per rule.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect as DrawRect;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;

use crate::error::{Result, StationError};
use crate::models::{BatchMeta, Rect, RuleOutcome, Verdict};
use crate::rules::InspectionRule;

const HEADER: [&str; 8] = [
    "timestamp",
    "batch",
    "product_code",
    "verdict",
    "rule_id",
    "camera",
    "passed",
    "reason",
];

#[derive(Debug, Clone)]
pub struct ResultLog {
    path: PathBuf,
}

impl ResultLog {
    /// `results.csv` inside `output_dir`, which is created if missing.
    pub fn new(output_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(output_dir)?;
        Ok(Self {
            path: output_dir.join("results.csv"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, outcomes: &[RuleOutcome], verdict: Verdict, meta: &BatchMeta) -> Result<()> {
        let write_header = !self.path.exists();
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = csv::Writer::from_writer(file);
        let to_err = |e: csv::Error| StationError::config(&self.path, e);

        if write_header {
            writer.write_record(HEADER).map_err(to_err)?;
        }

        let timestamp = meta
            .finished_at
            .format(&Rfc3339)
            .map_err(|e| StationError::config(&self.path, e))?;
        let batch = meta.batch_num.to_string();
        for outcome in outcomes {
            writer
                .write_record([
                    timestamp.as_str(),
                    batch.as_str(),
                    meta.product_code.as_str(),
                    verdict.as_str(),
                    outcome.rule_id.as_str(),
                    outcome.camera.as_str(),
                    if outcome.passed { "true" } else { "false" },
                    outcome.reason.to_string().as_str(),
                ])
                .map_err(to_err)?;
        }
        writer.flush()?;
        Ok(())
    }
}

const DETECT_COLOR: Rgb<u8> = Rgb([0, 120, 255]);
const COMPARE_COLOR: Rgb<u8> = Rgb([255, 200, 0]);
const PASS_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
const FAIL_COLOR: Rgb<u8> = Rgb([220, 0, 0]);
const LINE_WIDTH: i32 = 2;

/// `<date>_<time>_<batch>`, shared by every image of one batch.
pub fn batch_stamp(meta: &BatchMeta) -> String {
    let format = format_description!("[year][month][day]_[hour][minute][second]");
    match meta.finished_at.format(format) {
        Ok(time) => format!("{}_{:04}", time, meta.batch_num),
        Err(_) => format!("batch_{:04}", meta.batch_num),
    }
}

/// Saves `<dir>/<stamp>_<rule>_<camera>.jpg` for every rule outcome.
#[derive(Debug, Clone)]
pub struct AnnotatedImageWriter {
    dir: PathBuf,
}

impl AnnotatedImageWriter {
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self { dir: dir.to_path_buf() })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, stamp: &str, outcome: &RuleOutcome) -> PathBuf {
        let name = format!("{}_{}_{}.jpg", stamp, outcome.rule_id, outcome.camera);
        self.dir.join(name.replace(['/', '\\'], "_"))
    }

    pub fn write(
        &self,
        image: &DynamicImage,
        rule: &InspectionRule,
        outcome: &RuleOutcome,
        stamp: &str,
    ) -> Result<PathBuf> {
        let path = self.path_for(stamp, outcome);
        annotate(image, rule, outcome).save(&path)?;
        Ok(path)
    }
}

/// Detect region in blue, compare region in yellow, then the detection box,
/// its center and keypoints plus a corner badge in green (OK) or red (NG).
pub fn annotate(image: &DynamicImage, rule: &InspectionRule, outcome: &RuleOutcome) -> RgbImage {
    let mut canvas = image.to_rgb8();
    let color = if outcome.passed { PASS_COLOR } else { FAIL_COLOR };

    outline(&mut canvas, &rule.detect_region, DETECT_COLOR);
    outline(&mut canvas, &rule.compare_region, COMPARE_COLOR);

    if let Some(detection) = outcome.detection.as_ref().filter(|d| d.found) {
        if let Some(bbox) = detection.bbox {
            outline(&mut canvas, &bbox, color);
            let (cx, cy) = bbox.center();
            draw_filled_circle_mut(&mut canvas, (cx.round() as i32, cy.round() as i32), 4, color);
        }
        for point in detection.keypoints.iter().flatten() {
            draw_filled_circle_mut(&mut canvas, (point.x.round() as i32, point.y.round() as i32), 3, color);
        }
    }

    let badge = 16.min(canvas.width()).min(canvas.height());
    if badge > 0 {
        draw_filled_rect_mut(&mut canvas, DrawRect::at(0, 0).of_size(badge, badge), color);
    }
    canvas
}

fn outline(canvas: &mut RgbImage, rect: &Rect, color: Rgb<u8>) {
    for inset in 0..LINE_WIDTH {
        let r = Rect::new(rect.x1 + inset, rect.y1 + inset, rect.x2 - inset, rect.y2 - inset);
        if !r.is_valid() {
            break;
        }
        draw_hollow_rect_mut(
            canvas,
            DrawRect::at(r.x1, r.y1).of_size(r.width() as u32, r.height() as u32),
            color,
        );
    }
}
