//! Joining the blue, red and infrared arm readings of one exposure.
//!
//! Non-overlapping stretches are copied verbatim; the two overlap regions are
//! combined with [`crate::combine::merge_pair`].

use ndarray::{concatenate, s, Array1, ArrayView1, Axis};

use crate::combine::merge_pair;
use crate::config::ArmLayout;
use crate::data::model::{Arm, ArmReading, Classification, Exposure, Measurement};
use crate::error::{PipelineError, Result};

/// The three readings of one exposure, in arm order.
#[derive(Debug, Clone, PartialEq)]
pub struct ArmSet {
    pub blue: ArmReading,
    pub red: ArmReading,
    pub infrared: ArmReading,
}

impl ArmSet {
    /// Sort loose readings into arms.
    ///
    /// Fails on a missing or duplicated arm, or when a reading belongs to a
    /// different exposure than the first one.
    pub fn from_readings(readings: Vec<ArmReading>) -> Result<Self> {
        let expected = readings
            .first()
            .map(|r| r.key.clone())
            .ok_or(PipelineError::MissingArm { arm: Arm::Blue })?;

        let mut blue = None;
        let mut red = None;
        let mut infrared = None;
        for reading in readings {
            if reading.key != expected {
                return Err(PipelineError::ExposureMismatch {
                    arm: reading.arm,
                    expected: expected.to_string(),
                    found: reading.key.to_string(),
                });
            }
            let slot = match reading.arm {
                Arm::Blue => &mut blue,
                Arm::Red => &mut red,
                Arm::Infrared => &mut infrared,
            };
            if slot.is_some() {
                return Err(PipelineError::DuplicateArm { arm: reading.arm });
            }
            *slot = Some(reading);
        }

        Ok(ArmSet {
            blue: blue.ok_or(PipelineError::MissingArm { arm: Arm::Blue })?,
            red: red.ok_or(PipelineError::MissingArm { arm: Arm::Red })?,
            infrared: infrared.ok_or(PipelineError::MissingArm { arm: Arm::Infrared })?,
        })
    }

    fn arms(&self) -> [&ArmReading; 3] {
        [&self.blue, &self.red, &self.infrared]
    }
}

// ---------------------------------------------------------------------------
// ArmJoiner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct ArmJoiner {
    layout: ArmLayout,
}

impl ArmJoiner {
    pub fn new(layout: ArmLayout) -> Result<Self> {
        layout.validate()?;
        Ok(Self { layout })
    }

    pub fn layout(&self) -> &ArmLayout {
        &self.layout
    }

    fn expected_len(&self, arm: Arm) -> usize {
        match arm {
            Arm::Blue => self.layout.blue_bins,
            Arm::Red => self.layout.red_bins,
            Arm::Infrared => self.layout.infrared_bins,
        }
    }

    /// Check arm identity, exposure identity and fixed lengths.
    pub fn validate(&self, arms: &ArmSet) -> Result<()> {
        let key = &arms.blue.key;
        for (reading, arm) in arms.arms().into_iter().zip(Arm::ALL) {
            if reading.arm != arm {
                return Err(PipelineError::MissingArm { arm });
            }
            if &reading.key != key {
                return Err(PipelineError::ExposureMismatch {
                    arm,
                    expected: key.to_string(),
                    found: reading.key.to_string(),
                });
            }
            let expected = self.expected_len(arm);
            for found in [reading.wavelength.len(), reading.flux.len(), reading.ivar.len()] {
                if found != expected {
                    return Err(PipelineError::ArmLength {
                        arm,
                        expected,
                        found,
                    });
                }
            }
        }
        Ok(())
    }

    /// Joined wavelength grid: full blue, then red and infrared past their
    /// leading overlaps.
    pub fn joined_wavelength(&self, arms: &ArmSet) -> Result<Array1<f64>> {
        self.validate(arms)?;
        let l = &self.layout;
        stitch(&[
            arms.blue.wavelength.view(),
            arms.red.wavelength.slice(s![l.overlap_blue_red..]),
            arms.infrared.wavelength.slice(s![l.overlap_red_infrared..]),
        ])
    }

    /// Join the three arms into one (flux, ivar) pair of length
    /// `layout.joined_len()`.
    pub fn join(&self, arms: &ArmSet) -> Result<Measurement> {
        self.validate(arms)?;
        let l = &self.layout;
        let (b, r) = (l.blue_bins, l.red_bins);
        let (obr, orz) = (l.overlap_blue_red, l.overlap_red_infrared);
        let (blue, red, ir) = (&arms.blue, &arms.red, &arms.infrared);

        let blue_red = merge_pair(
            blue.flux.slice(s![b - obr..]),
            blue.ivar.slice(s![b - obr..]),
            red.flux.slice(s![..obr]),
            red.ivar.slice(s![..obr]),
        )?;
        let red_ir = merge_pair(
            red.flux.slice(s![r - orz..]),
            red.ivar.slice(s![r - orz..]),
            ir.flux.slice(s![..orz]),
            ir.ivar.slice(s![..orz]),
        )?;

        let flux = stitch(&[
            blue.flux.slice(s![..b - obr]),
            blue_red.flux.view(),
            red.flux.slice(s![obr..r - orz]),
            red_ir.flux.view(),
            ir.flux.slice(s![orz..]),
        ])?;
        let ivar = stitch(&[
            blue.ivar.slice(s![..b - obr]),
            blue_red.ivar.view(),
            red.ivar.slice(s![obr..r - orz]),
            red_ir.ivar.view(),
            ir.ivar.slice(s![orz..]),
        ])?;

        debug_assert_eq!(flux.len(), l.joined_len());
        Ok(Measurement { flux, ivar })
    }

    /// Join an exposure and attach its classification.
    pub fn join_exposure(&self, arms: &ArmSet, classification: Classification) -> Result<Exposure> {
        let spectrum = self.join(arms)?;
        Ok(Exposure {
            key: arms.blue.key.clone(),
            classification,
            spectrum,
        })
    }
}

fn stitch(parts: &[ArrayView1<'_, f64>]) -> Result<Array1<f64>> {
    concatenate(Axis(0), parts).map_err(|e| PipelineError::Config(format!("arm layout: {e}")))
}
