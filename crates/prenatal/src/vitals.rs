//! Checkup vitals and their validation.

use core::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use maternity_core::{DomainError, DomainResult};

const SYSTOLIC_RANGE: RangeInclusive<u16> = 70..=250;
const DIASTOLIC_RANGE: RangeInclusive<u16> = 40..=150;
const WEIGHT_KG_RANGE: RangeInclusive<f64> = 30.0..=250.0;
const FETAL_HEART_RATE_RANGE: RangeInclusive<u16> = 60..=220;
const FUNDAL_HEIGHT_CM_RANGE: RangeInclusive<f64> = 0.0..=50.0;

/// Fetal heart rate considered reassuring (bpm).
const NORMAL_FETAL_HEART_RATE: RangeInclusive<u16> = 110..=160;

/// Blood pressure reading. Systolic and diastolic are validated together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloodPressure {
    systolic: u16,
    diastolic: u16,
}

impl BloodPressure {
    pub fn new(systolic: u16, diastolic: u16) -> DomainResult<Self> {
        let reading = Self {
            systolic,
            diastolic,
        };
        reading.validate()?;
        Ok(reading)
    }

    pub fn systolic(&self) -> u16 {
        self.systolic
    }

    pub fn diastolic(&self) -> u16 {
        self.diastolic
    }

    /// Gestational hypertension threshold: 140/90.
    pub fn is_hypertensive(&self) -> bool {
        self.systolic >= 140 || self.diastolic >= 90
    }

    fn validate(&self) -> DomainResult<()> {
        let in_bounds =
            SYSTOLIC_RANGE.contains(&self.systolic) && DIASTOLIC_RANGE.contains(&self.diastolic);
        if !in_bounds || self.systolic <= self.diastolic {
            return Err(DomainError::validation(format!(
                "blood pressure {}/{} is not a plausible reading \
                 (systolic {}-{}, diastolic {}-{}, systolic above diastolic)",
                self.systolic,
                self.diastolic,
                SYSTOLIC_RANGE.start(),
                SYSTOLIC_RANGE.end(),
                DIASTOLIC_RANGE.start(),
                DIASTOLIC_RANGE.end(),
            )));
        }
        Ok(())
    }
}

impl core::fmt::Display for BloodPressure {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.systolic, self.diastolic)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetalPresentation {
    Cephalic,
    Breech,
    Transverse,
    Oblique,
}

/// Explicit risk marker set by the clinician at a checkup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskMarker {
    #[default]
    None,
    Monitor,
    HighRisk,
}

/// Measurements taken at a checkup. Every field is optional; whatever is
/// present must be in range.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Vitals {
    pub weight_kg: Option<f64>,
    pub blood_pressure: Option<BloodPressure>,
    pub fetal_heart_rate: Option<u16>,
    pub fundal_height_cm: Option<f64>,
    pub presentation: Option<FetalPresentation>,
}

impl Vitals {
    pub fn validate(&self) -> DomainResult<()> {
        if let Some(weight) = self.weight_kg {
            if !WEIGHT_KG_RANGE.contains(&weight) {
                return Err(DomainError::validation(format!(
                    "weight {weight} kg is out of range"
                )));
            }
        }
        // Deserialized readings bypass `BloodPressure::new`.
        if let Some(bp) = self.blood_pressure {
            bp.validate()?;
        }
        if let Some(rate) = self.fetal_heart_rate {
            if !FETAL_HEART_RATE_RANGE.contains(&rate) {
                return Err(DomainError::validation(format!(
                    "fetal heart rate {rate} bpm is out of range"
                )));
            }
        }
        if let Some(height) = self.fundal_height_cm {
            if !FUNDAL_HEIGHT_CM_RANGE.contains(&height) {
                return Err(DomainError::validation(format!(
                    "fundal height {height} cm is out of range"
                )));
            }
        }
        Ok(())
    }

    /// Hypertensive blood pressure or a non-reassuring fetal heart rate.
    pub fn is_abnormal(&self) -> bool {
        let hypertensive = self.blood_pressure.is_some_and(|bp| bp.is_hypertensive());
        let fetal_distress = self
            .fetal_heart_rate
            .is_some_and(|rate| !NORMAL_FETAL_HEART_RATE.contains(&rate));
        hypertensive || fetal_distress
    }
}
