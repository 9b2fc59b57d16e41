use std::collections::HashMap;

use image::{GrayImage, Luma};
use imageproc::region_labelling::{Connectivity, connected_components};

use crate::models::Contour;

/// Bounding boxes of the 8-connected edge groups in `edges` that have at
/// least `min_pixels` pixels, ordered by label.
pub fn find_contours(edges: &GrayImage, min_pixels: u32) -> Vec<Contour> {
    let labels = connected_components(edges, Connectivity::Eight, Luma([0]));

    let mut groups: HashMap<u32, Contour> = HashMap::new();
    for (x, y, Luma([label])) in labels.enumerate_pixels() {
        if *label == 0 {
            continue;
        }
        let group = groups.entry(*label).or_insert(Contour {
            label: *label,
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            pixel_count: 0,
        });
        group.min_x = group.min_x.min(x);
        group.min_y = group.min_y.min(y);
        group.max_x = group.max_x.max(x);
        group.max_y = group.max_y.max(y);
        group.pixel_count += 1;
    }

    let mut contours: Vec<Contour> = groups
        .into_values()
        .filter(|c| c.pixel_count >= min_pixels)
        .collect();
    contours.sort_by_key(|c| c.label);
    contours
}
