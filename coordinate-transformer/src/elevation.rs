use crate::geoid::GeoidModel;

/// One stage of the elevation correction pipeline applied to every point at
/// ingestion time. An undefined (NaN) input elevation is treated as 0.
pub trait ElevationCorrector: Send + Sync {
    fn correct(&self, lon: f64, lat: f64, z: f64) -> f64;
}

/// Adds a constant vertical offset, in meters.
pub struct OffsetCorrector {
    offset: f64,
}

impl OffsetCorrector {
    pub fn new(offset: f64) -> Self {
        Self { offset }
    }
}

impl ElevationCorrector for OffsetCorrector {
    fn correct(&self, _lon: f64, _lat: f64, z: f64) -> f64 {
        defined(z) + self.offset
    }
}

/// Converts geoid (orthometric) heights to ellipsoidal heights by adding
/// the modelled geoid undulation at the point's position.
pub struct GeoidCorrector {
    model: Box<dyn GeoidModel>,
}

impl GeoidCorrector {
    pub fn new(model: Box<dyn GeoidModel>) -> Self {
        Self { model }
    }
}

impl ElevationCorrector for GeoidCorrector {
    fn correct(&self, lon: f64, lat: f64, z: f64) -> f64 {
        defined(z) + self.model.height_offset(lon, lat)
    }
}

/// Sequential composition of correction stages.
pub struct PipelineCorrector {
    stages: Vec<Box<dyn ElevationCorrector>>,
}

impl PipelineCorrector {
    pub fn new(stages: Vec<Box<dyn ElevationCorrector>>) -> Self {
        Self { stages }
    }
}

impl ElevationCorrector for PipelineCorrector {
    fn correct(&self, lon: f64, lat: f64, z: f64) -> f64 {
        self.stages
            .iter()
            .fold(defined(z), |z, stage| stage.correct(lon, lat, z))
    }
}

fn defined(z: f64) -> f64 {
    if z.is_nan() {
        0.0
    } else {
        z
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ConstantGeoid(f64);

    impl GeoidModel for ConstantGeoid {
        fn height_offset(&self, _lon: f64, _lat: f64) -> f64 {
            self.0
        }
    }

    #[test]
    fn offset_shifts_elevation() {
        let corrector = OffsetCorrector::new(-2.5);
        assert_eq!(corrector.correct(10.0, 45.0, 100.0), 97.5);
    }

    #[test]
    fn nan_elevation_counts_as_zero() {
        let corrector = OffsetCorrector::new(3.0);
        assert_eq!(corrector.correct(10.0, 45.0, f64::NAN), 3.0);
    }

    #[test]
    fn geoid_correction_adds_the_undulation() {
        let corrector = GeoidCorrector::new(Box::new(ConstantGeoid(48.3)));
        assert_eq!(corrector.correct(13.8, 42.3, 1.0), 49.3);
    }

    #[test]
    fn pipeline_applies_stages_in_order() {
        let pipeline = PipelineCorrector::new(vec![
            Box::new(OffsetCorrector::new(1.0)),
            Box::new(GeoidCorrector::new(Box::new(ConstantGeoid(10.0)))),
        ]);
        assert_eq!(pipeline.correct(0.0, 0.0, 5.0), 16.0);
    }

    #[test]
    fn empty_pipeline_is_the_identity_for_defined_z() {
        let pipeline = PipelineCorrector::new(Vec::new());
        assert_eq!(pipeline.correct(0.0, 0.0, 12.0), 12.0);
        assert_eq!(pipeline.correct(0.0, 0.0, f64::NAN), 0.0);
    }
}
