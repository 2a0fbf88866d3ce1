use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Serialize as the user-facing label; deserialize from the label given as a string
/// or a bare number. Unknown labels are a deserialization error.
macro_rules! label_serde {
    ($ty:ident, $what:literal) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.label())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                struct LabelVisitor;

                impl<'de> Visitor<'de> for LabelVisitor {
                    type Value = $ty;

                    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                        write!(f, "a {} label", $what)
                    }

                    fn visit_str<E: de::Error>(self, v: &str) -> Result<$ty, E> {
                        $ty::from_label(v.trim()).ok_or_else(|| {
                            E::custom(format!("unknown {} `{}`", $what, v))
                        })
                    }

                    fn visit_u64<E: de::Error>(self, v: u64) -> Result<$ty, E> {
                        self.visit_str(&v.to_string())
                    }

                    fn visit_i64<E: de::Error>(self, v: i64) -> Result<$ty, E> {
                        self.visit_str(&v.to_string())
                    }

                    fn visit_f64<E: de::Error>(self, v: f64) -> Result<$ty, E> {
                        if v.fract() == 0.0 && v.is_finite() {
                            self.visit_str(&format!("{v:.0}"))
                        } else {
                            Err(E::custom(format!("unknown {} `{}`", $what, v)))
                        }
                    }
                }

                deserializer.deserialize_any(LabelVisitor)
            }
        }
    };
}

/// Which channel a measurement is taken on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightKind {
    /// Ambient light, reported in lux.
    Ambient,
    /// Ultraviolet, reported as UV index.
    Uv,
}

impl LightKind {
    pub(crate) fn mode(self) -> u8 {
        match self {
            LightKind::Ambient => 0x02,
            LightKind::Uv => 0x0A,
        }
    }

    pub(crate) fn int_cfg(self) -> u8 {
        match self {
            LightKind::Ambient => 0x14,
            LightKind::Uv => 0x34,
        }
    }

    pub(crate) fn data_register(self) -> u8 {
        match self {
            LightKind::Ambient => super::reg::ALS_DATA,
            LightKind::Uv => super::reg::UVS_DATA,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gain {
    X1,
    X3,
    X6,
    X9,
    X18,
}

impl Gain {
    pub const ALL: [Gain; 5] = [Gain::X1, Gain::X3, Gain::X6, Gain::X9, Gain::X18];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code)).copied()
    }

    pub fn multiplier(self) -> f64 {
        match self {
            Gain::X1 => 1.0,
            Gain::X3 => 3.0,
            Gain::X6 => 6.0,
            Gain::X9 => 9.0,
            Gain::X18 => 18.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Gain::X1 => "1",
            Gain::X3 => "3",
            Gain::X6 => "6",
            Gain::X9 => "9",
            Gain::X18 => "18",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.label() == label)
    }
}

/// ADC resolution. The register code sits in the high nibble of MEAS_RATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Bits20,
    Bits19,
    Bits18,
    Bits17,
    Bits16,
    Bits13,
}

impl Resolution {
    pub const ALL: [Resolution; 6] = [
        Resolution::Bits20,
        Resolution::Bits19,
        Resolution::Bits18,
        Resolution::Bits17,
        Resolution::Bits16,
        Resolution::Bits13,
    ];

    pub fn code(self) -> u8 {
        (self as u8) << 4
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code >> 4)).copied()
    }

    pub fn bits(self) -> u8 {
        match self {
            Resolution::Bits20 => 20,
            Resolution::Bits19 => 19,
            Resolution::Bits18 => 18,
            Resolution::Bits17 => 17,
            Resolution::Bits16 => 16,
            Resolution::Bits13 => 13,
        }
    }

    /// Integration time relative to 100 ms. 13-bit conversions have none.
    pub fn integration_factor(self) -> Option<f64> {
        match self {
            Resolution::Bits20 => Some(4.0),
            Resolution::Bits19 => Some(2.0),
            Resolution::Bits18 => Some(1.0),
            Resolution::Bits17 => Some(0.5),
            Resolution::Bits16 => Some(0.25),
            Resolution::Bits13 => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Resolution::Bits20 => "20",
            Resolution::Bits19 => "19",
            Resolution::Bits18 => "18",
            Resolution::Bits17 => "17",
            Resolution::Bits16 => "16",
            Resolution::Bits13 => "13",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.label() == label)
    }
}

/// Measurement repeat rate, low nibble of MEAS_RATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementRate {
    Ms25,
    Ms50,
    Ms100,
    Ms200,
    Ms500,
    Ms1000,
    Ms2000,
}

impl MeasurementRate {
    pub const ALL: [MeasurementRate; 7] = [
        MeasurementRate::Ms25,
        MeasurementRate::Ms50,
        MeasurementRate::Ms100,
        MeasurementRate::Ms200,
        MeasurementRate::Ms500,
        MeasurementRate::Ms1000,
        MeasurementRate::Ms2000,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Codes 6 and 7 both select 2000 ms.
    pub fn from_code(code: u8) -> Option<Self> {
        match code & 0x0F {
            7 => Some(MeasurementRate::Ms2000),
            c => Self::ALL.get(usize::from(c)).copied(),
        }
    }

    pub fn millis(self) -> u32 {
        match self {
            MeasurementRate::Ms25 => 25,
            MeasurementRate::Ms50 => 50,
            MeasurementRate::Ms100 => 100,
            MeasurementRate::Ms200 => 200,
            MeasurementRate::Ms500 => 500,
            MeasurementRate::Ms1000 => 1000,
            MeasurementRate::Ms2000 => 2000,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MeasurementRate::Ms25 => "25ms",
            MeasurementRate::Ms50 => "50ms",
            MeasurementRate::Ms100 => "100ms",
            MeasurementRate::Ms200 => "200ms",
            MeasurementRate::Ms500 => "500ms",
            MeasurementRate::Ms1000 => "1000ms",
            MeasurementRate::Ms2000 => "2000ms",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.label() == label)
    }
}

label_serde!(Gain, "gain");
label_serde!(Resolution, "resolution");
label_serde!(MeasurementRate, "measurement rate");
