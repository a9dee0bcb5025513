//! Typed properties.
//!
//! Every engine object carries a property bag described by a static table
//! of [`PropertyDef`]s. Reads are safe from any thread; writes are
//! validated at the ABI boundary and applied on the context thread through
//! the command queue. The bag tracks a changed bit per property so DSP
//! code can cheaply detect what to recompute: `acquire` returns the value
//! only if it changed since the last acquire, clearing the bit.
//!
//! Two pseudo-properties, `CURRENT_TIME` and `SUGGESTED_AUTOMATION_TIME`,
//! are read-only views of audio-thread time and never live in a bag.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use resona_core::{EngineError, EngineResult};
use resona_dsp::BiquadDef;

/// Stable property identifiers shared across object types.
pub mod ids {
    pub const GAIN: u32 = 0;
    pub const POSITION: u32 = 1;
    pub const ORIENTATION: u32 = 2;
    pub const DEFAULT_PANNER_STRATEGY: u32 = 3;
    pub const DEFAULT_DISTANCE_MODEL: u32 = 4;
    pub const DEFAULT_DISTANCE_REF: u32 = 5;
    pub const DEFAULT_DISTANCE_MAX: u32 = 6;
    pub const DEFAULT_ROLLOFF: u32 = 7;
    pub const DEFAULT_CLOSENESS_BOOST: u32 = 8;
    pub const DEFAULT_CLOSENESS_BOOST_DISTANCE: u32 = 9;

    pub const AZIMUTH: u32 = 10;
    pub const ELEVATION: u32 = 11;
    pub const PANNING_SCALAR: u32 = 12;
    pub const PANNER_STRATEGY: u32 = 13;

    pub const DISTANCE_MODEL: u32 = 14;
    pub const DISTANCE_REF: u32 = 15;
    pub const DISTANCE_MAX: u32 = 16;
    pub const ROLLOFF: u32 = 17;
    pub const CLOSENESS_BOOST: u32 = 18;
    pub const CLOSENESS_BOOST_DISTANCE: u32 = 19;

    pub const BUFFER: u32 = 20;
    pub const PLAYBACK_POSITION: u32 = 21;
    pub const LOOPING: u32 = 22;
    pub const PITCH_BEND: u32 = 23;

    pub const NOISE_TYPE: u32 = 24;
    pub const FREQUENCY: u32 = 25;

    pub const FILTER: u32 = 26;
    pub const FILTER_DIRECT: u32 = 27;
    pub const FILTER_EFFECTS: u32 = 28;
    pub const FILTER_INPUT: u32 = 29;

    pub const MEAN_FREE_PATH: u32 = 30;
    pub const T60: u32 = 31;
    pub const LATE_REFLECTIONS_DIFFUSION: u32 = 32;

    /// Read-only pseudo-property: audio-thread time in seconds.
    pub const CURRENT_TIME: u32 = 33;
    /// Read-only pseudo-property: a slightly-ahead time suitable as the
    /// base for new automation.
    pub const SUGGESTED_AUTOMATION_TIME: u32 = 34;
}

/// A property value of any supported type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyValue {
    Int(i64),
    Double(f64),
    Double3([f64; 3]),
    Double6([f64; 6]),
    /// An object reference by handle; 0 clears.
    ObjectHandle(u64),
    Biquad(BiquadDef),
}

/// The type and range of one property.
#[derive(Debug, Clone, Copy)]
pub enum PropertyKind {
    Int { min: i64, max: i64 },
    Double { min: f64, max: f64 },
    Double3,
    Double6,
    Object,
    Biquad,
}

/// One entry of an object type's property table.
#[derive(Debug, Clone, Copy)]
pub struct PropertyDef {
    pub id: u32,
    pub name: &'static str,
    pub kind: PropertyKind,
    pub default: PropertyValue,
}

impl PropertyDef {
    /// Validate a candidate value against this definition.
    pub fn validate(&self, value: &PropertyValue) -> EngineResult<()> {
        match (&self.kind, value) {
            (PropertyKind::Int { min, max }, PropertyValue::Int(v)) => {
                if v < min || v > max {
                    Err(EngineError::Range {
                        value: *v as f64,
                        min: *min as f64,
                        max: *max as f64,
                    })
                } else {
                    Ok(())
                }
            }
            (PropertyKind::Double { min, max }, PropertyValue::Double(v)) => {
                if !v.is_finite() && (min.is_finite() || max.is_finite()) {
                    return Err(EngineError::Range {
                        value: *v,
                        min: *min,
                        max: *max,
                    });
                }
                if v < min || v > max {
                    Err(EngineError::Range {
                        value: *v,
                        min: *min,
                        max: *max,
                    })
                } else {
                    Ok(())
                }
            }
            (PropertyKind::Double3, PropertyValue::Double3(_)) => Ok(()),
            (PropertyKind::Double6, PropertyValue::Double6(_)) => Ok(()),
            (PropertyKind::Object, PropertyValue::ObjectHandle(_)) => Ok(()),
            (PropertyKind::Biquad, PropertyValue::Biquad(_)) => Ok(()),
            _ => Err(EngineError::PropertyType(format!(
                "property {} ({}) given a value of the wrong type",
                self.id, self.name
            ))),
        }
    }
}

struct PropertySlot {
    value: Mutex<PropertyValue>,
}

/// Per-object property storage.
pub struct PropertyBag {
    defs: &'static [PropertyDef],
    slots: Box<[PropertySlot]>,
    /// One bit per slot; set on every externally-visible write, cleared by
    /// `acquire`. Starts all-set so DSP code picks up defaults on the
    /// first block.
    changed: AtomicU64,
}

impl PropertyBag {
    pub fn new(defs: &'static [PropertyDef]) -> Self {
        assert!(defs.len() <= 64, "changed bitset is 64 bits wide");
        let slots = defs
            .iter()
            .map(|d| PropertySlot {
                value: Mutex::new(d.default),
            })
            .collect();
        let initial = if defs.is_empty() {
            0
        } else {
            u64::MAX >> (64 - defs.len())
        };
        Self {
            defs,
            slots,
            changed: AtomicU64::new(initial),
        }
    }

    pub fn defs(&self) -> &'static [PropertyDef] {
        self.defs
    }

    fn index_of(&self, id: u32) -> EngineResult<usize> {
        self.defs
            .iter()
            .position(|d| d.id == id)
            .ok_or(EngineError::InvalidProperty(id))
    }

    pub fn def(&self, id: u32) -> EngineResult<&'static PropertyDef> {
        Ok(&self.defs[self.index_of(id)?])
    }

    /// Read the last-applied value. Safe from any thread.
    pub fn read(&self, id: u32) -> EngineResult<PropertyValue> {
        let index = self.index_of(id)?;
        Ok(*self.slots[index].value.lock())
    }

    /// Validate and store a value. `mark_changed` is false for values the
    /// audio thread writes back itself (e.g. playback position), which must
    /// not re-trigger DSP reconfiguration.
    pub fn write(&self, id: u32, value: PropertyValue, mark_changed: bool) -> EngineResult<()> {
        let index = self.index_of(id)?;
        self.defs[index].validate(&value)?;
        *self.slots[index].value.lock() = value;
        if mark_changed {
            self.changed.fetch_or(1 << index, Ordering::AcqRel);
        }
        Ok(())
    }

    /// Audio-thread helper: return the value if it changed since the last
    /// acquire, clearing the changed bit.
    pub fn acquire(&self, id: u32) -> Option<PropertyValue> {
        let index = self.index_of(id).ok()?;
        let bit = 1u64 << index;
        let prev = self.changed.fetch_and(!bit, Ordering::AcqRel);
        if prev & bit != 0 {
            Some(*self.slots[index].value.lock())
        } else {
            None
        }
    }

    // Typed conveniences for engine-internal reads of known properties.

    pub fn get_double(&self, id: u32) -> f64 {
        match self.read(id) {
            Ok(PropertyValue::Double(v)) => v,
            other => unreachable!("property {id} is not a double: {other:?}"),
        }
    }

    pub fn get_int(&self, id: u32) -> i64 {
        match self.read(id) {
            Ok(PropertyValue::Int(v)) => v,
            other => unreachable!("property {id} is not an int: {other:?}"),
        }
    }

    pub fn get_double3(&self, id: u32) -> [f64; 3] {
        match self.read(id) {
            Ok(PropertyValue::Double3(v)) => v,
            other => unreachable!("property {id} is not a double3: {other:?}"),
        }
    }

    pub fn get_double6(&self, id: u32) -> [f64; 6] {
        match self.read(id) {
            Ok(PropertyValue::Double6(v)) => v,
            other => unreachable!("property {id} is not a double6: {other:?}"),
        }
    }

    pub fn acquire_double(&self, id: u32) -> Option<f64> {
        match self.acquire(id) {
            Some(PropertyValue::Double(v)) => Some(v),
            None => None,
            other => unreachable!("property {id} is not a double: {other:?}"),
        }
    }

    pub fn acquire_int(&self, id: u32) -> Option<i64> {
        match self.acquire(id) {
            Some(PropertyValue::Int(v)) => Some(v),
            None => None,
            other => unreachable!("property {id} is not an int: {other:?}"),
        }
    }

    pub fn acquire_biquad(&self, id: u32) -> Option<BiquadDef> {
        match self.acquire(id) {
            Some(PropertyValue::Biquad(v)) => Some(v),
            None => None,
            other => unreachable!("property {id} is not a biquad: {other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static TEST_DEFS: &[PropertyDef] = &[
        PropertyDef {
            id: ids::GAIN,
            name: "gain",
            kind: PropertyKind::Double {
                min: 0.0,
                max: f64::INFINITY,
            },
            default: PropertyValue::Double(1.0),
        },
        PropertyDef {
            id: ids::LOOPING,
            name: "looping",
            kind: PropertyKind::Int { min: 0, max: 1 },
            default: PropertyValue::Int(0),
        },
    ];

    #[test]
    fn defaults_and_reads() {
        let bag = PropertyBag::new(TEST_DEFS);
        assert_eq!(bag.get_double(ids::GAIN), 1.0);
        assert_eq!(bag.get_int(ids::LOOPING), 0);
        assert!(matches!(
            bag.read(ids::AZIMUTH),
            Err(EngineError::InvalidProperty(_))
        ));
    }

    #[test]
    fn range_enforced_with_endpoints_allowed() {
        let bag = PropertyBag::new(TEST_DEFS);
        assert!(bag.write(ids::LOOPING, PropertyValue::Int(0), true).is_ok());
        assert!(bag.write(ids::LOOPING, PropertyValue::Int(1), true).is_ok());
        assert!(matches!(
            bag.write(ids::LOOPING, PropertyValue::Int(2), true),
            Err(EngineError::Range { .. })
        ));
        assert!(matches!(
            bag.write(ids::GAIN, PropertyValue::Double(-0.1), true),
            Err(EngineError::Range { .. })
        ));
        // Failed writes leave the value unchanged.
        assert_eq!(bag.get_double(ids::GAIN), 1.0);
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let bag = PropertyBag::new(TEST_DEFS);
        assert!(matches!(
            bag.write(ids::GAIN, PropertyValue::Int(1), true),
            Err(EngineError::PropertyType(_))
        ));
    }

    #[test]
    fn acquire_reports_only_changes() {
        let bag = PropertyBag::new(TEST_DEFS);
        // Defaults are visible to the first acquire.
        assert_eq!(bag.acquire_double(ids::GAIN), Some(1.0));
        assert_eq!(bag.acquire_double(ids::GAIN), None);

        bag.write(ids::GAIN, PropertyValue::Double(0.5), true).unwrap();
        assert_eq!(bag.acquire_double(ids::GAIN), Some(0.5));
        assert_eq!(bag.acquire_double(ids::GAIN), None);

        // Writes without mark_changed are visible to read but not acquire.
        bag.write(ids::GAIN, PropertyValue::Double(0.25), false)
            .unwrap();
        assert_eq!(bag.acquire_double(ids::GAIN), None);
        assert_eq!(bag.get_double(ids::GAIN), 0.25);
    }
}
