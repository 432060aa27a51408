use crate::detection::{authenticity, preprocessing, roi};
use crate::error::Result;
use crate::pipeline::{MetadataValue, PipelineContext, PipelineData, PipelineStep};
use image::DynamicImage;

/// Locate the watermark region in the original image
pub struct RoiStep;

impl PipelineStep for RoiStep {
    fn process(&self, data: PipelineData, _context: &PipelineContext) -> Result<PipelineData> {
        let bbox = roi::locate_roi(&data.original);

        let mut new_item = match &bbox {
            // Stage image shows the crop so debug output reflects the region
            Some(b) => {
                let cropped = data.original.crop_imm(b.x, b.y, b.width, b.height);
                data.with_image(cropped)
            }
            None => data,
        };
        new_item.bbox = bbox;
        new_item
            .metadata
            .insert("roi_found".to_string(), MetadataValue::Bool(bbox.is_some()));
        if let Some(b) = bbox {
            new_item
                .metadata
                .insert("roi_area".to_string(), MetadataValue::Int(b.area() as i64));
        }
        Ok(new_item)
    }

    fn name(&self) -> &str {
        "ROI Localization"
    }
}

/// Grayscale, crop to the ROI found earlier (if any) and equalize
pub struct PreprocessStep;

impl PipelineStep for PreprocessStep {
    fn process(&self, data: PipelineData, context: &PipelineContext) -> Result<PipelineData> {
        let equalized =
            preprocessing::preprocess(&data.original, data.bbox.as_ref(), &context.config)?;
        Ok(data.with_image(DynamicImage::ImageLuma8(equalized)))
    }

    fn name(&self) -> &str {
        "Equalization"
    }
}

/// Blur and run Canny
pub struct EdgeDetectionStep;

impl PipelineStep for EdgeDetectionStep {
    fn process(&self, data: PipelineData, context: &PipelineContext) -> Result<PipelineData> {
        let gray = data.image.to_luma8();
        let edges = preprocessing::detect_edges(&gray, &context.config)?;
        Ok(data.with_image(DynamicImage::ImageLuma8(edges)))
    }

    fn name(&self) -> &str {
        "Edge Detection"
    }
}

/// Score the edge map; the stage image stays the edge map
pub struct AuthenticityStep;

impl PipelineStep for AuthenticityStep {
    fn process(&self, data: PipelineData, context: &PipelineContext) -> Result<PipelineData> {
        let edges = data.image.to_luma8();
        let result = authenticity::score(&edges, &context.config);

        let mut new_item = data
            .with_metadata("edge_pixels", MetadataValue::Int(result.edge_pixels as i64))
            .with_metadata("entropy", MetadataValue::Float(result.entropy))
            .with_metadata("verdict", MetadataValue::String(result.verdict.to_string()));
        new_item.analysis = Some(result);
        Ok(new_item)
    }

    fn name(&self) -> &str {
        "Authenticity Scoring"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::models::BoundingBox;
    use image::{GrayImage, Luma};
    use std::sync::Arc;

    fn context() -> PipelineContext {
        PipelineContext {
            config: Arc::new(Configuration::default()),
            debug: None,
        }
    }

    #[test]
    fn test_roi_step_records_region() {
        let mut img = GrayImage::from_pixel(40, 30, Luma([245]));
        for y in 10..20 {
            for x in 5..25 {
                img.put_pixel(x, y, Luma([40]));
            }
        }
        let data = PipelineData::from_image(DynamicImage::ImageLuma8(img));
        let out = RoiStep.process(data, &context()).unwrap();

        assert_eq!(out.bbox, Some(BoundingBox::new(5, 10, 20, 10)));
        assert_eq!(out.get_bool("roi_found"), Some(true));
        assert_eq!(out.get_int("roi_area"), Some(200));
        assert_eq!((out.image.width(), out.image.height()), (20, 10));
    }

    #[test]
    fn test_roi_step_without_region_keeps_image() {
        let img = GrayImage::from_pixel(40, 30, Luma([245]));
        let data = PipelineData::from_image(DynamicImage::ImageLuma8(img));
        let out = RoiStep.process(data, &context()).unwrap();
        assert_eq!(out.bbox, None);
        assert_eq!(out.get_bool("roi_found"), Some(false));
        assert_eq!((out.image.width(), out.image.height()), (40, 30));
    }

    #[test]
    fn test_authenticity_step_sets_result() {
        let data = PipelineData::from_image(DynamicImage::ImageLuma8(GrayImage::new(10, 10)));
        let out = AuthenticityStep.process(data, &context()).unwrap();
        let analysis = out.analysis.unwrap();
        assert_eq!(analysis.edge_pixels, 0);
        assert_eq!(out.get_string("verdict"), Some("counterfeit"));
        assert_eq!(out.get_int("edge_pixels"), Some(0));
        assert_eq!(out.get_float("entropy"), Some(analysis.entropy));
    }
}
