//! Engine object identity: types, handles, and the client-shared half of
//! every object.
//!
//! Objects are addressed by opaque 64-bit handles; handles are allocated
//! once and never reused, so a handle-table lookup doubles as a liveness
//! check. The [`ObjectCommon`] is the half of an object both sides see:
//! the property bag, userdata, and delete-behavior configuration. All DSP
//! state lives on the context thread, keyed by handle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use resona_core::{DistanceModel, EngineResult};
use resona_dsp::BiquadDef;
use resona_spatial::PannerStrategy;

use crate::properties::{PropertyBag, PropertyDef, PropertyKind, PropertyValue, ids};

/// Opaque object identifier. Zero is never a valid handle.
pub type Handle = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ObjectType {
    Context = 1,
    Buffer = 2,
    StreamHandle = 3,
    AutomationBatch = 4,
    BufferGenerator = 5,
    StreamingGenerator = 6,
    SineBankGenerator = 7,
    NoiseGenerator = 8,
    DirectSource = 9,
    AngularPannedSource = 10,
    ScalarPannedSource = 11,
    Source3D = 12,
    GlobalEcho = 13,
    GlobalFdnReverb = 14,
}

impl ObjectType {
    pub fn is_source(self) -> bool {
        matches!(
            self,
            ObjectType::DirectSource
                | ObjectType::AngularPannedSource
                | ObjectType::ScalarPannedSource
                | ObjectType::Source3D
        )
    }

    pub fn is_generator(self) -> bool {
        matches!(
            self,
            ObjectType::BufferGenerator
                | ObjectType::StreamingGenerator
                | ObjectType::SineBankGenerator
                | ObjectType::NoiseGenerator
        )
    }

    pub fn is_effect(self) -> bool {
        matches!(self, ObjectType::GlobalEcho | ObjectType::GlobalFdnReverb)
    }
}

/// The client-shared half of every engine object.
pub struct ObjectCommon {
    handle: Handle,
    object_type: ObjectType,
    bag: PropertyBag,
    userdata: AtomicU64,
    linger_enabled: AtomicBool,
    /// Timeout in seconds as f64 bits; 0.0 means "no limit".
    linger_timeout: AtomicU64,
}

impl ObjectCommon {
    pub fn new(handle: Handle, object_type: ObjectType) -> Self {
        Self {
            handle,
            object_type,
            bag: PropertyBag::new(property_table(object_type)),
            userdata: AtomicU64::new(0),
            linger_enabled: AtomicBool::new(false),
            linger_timeout: AtomicU64::new(0.0f64.to_bits()),
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    pub fn bag(&self) -> &PropertyBag {
        &self.bag
    }

    pub fn userdata(&self) -> u64 {
        self.userdata.load(Ordering::Acquire)
    }

    pub fn set_userdata(&self, value: u64) {
        self.userdata.store(value, Ordering::Release);
    }

    pub fn configure_delete_behavior(&self, linger: bool, timeout: f64) {
        self.linger_enabled.store(linger, Ordering::Release);
        self.linger_timeout
            .store(timeout.to_bits(), Ordering::Release);
    }

    pub fn linger_enabled(&self) -> bool {
        self.linger_enabled.load(Ordering::Acquire)
    }

    pub fn linger_timeout(&self) -> f64 {
        f64::from_bits(self.linger_timeout.load(Ordering::Acquire))
    }

    /// Validate a property write against this object's table without
    /// applying it. Used at the ABI boundary so failures are synchronous.
    pub fn validate_property(&self, id: u32, value: &PropertyValue) -> EngineResult<()> {
        self.bag.def(id)?.validate(value)
    }
}

const UNBOUNDED: PropertyKind = PropertyKind::Double {
    min: f64::NEG_INFINITY,
    max: f64::INFINITY,
};

const NONNEG: PropertyKind = PropertyKind::Double {
    min: 0.0,
    max: f64::INFINITY,
};

const fn gain_def() -> PropertyDef {
    PropertyDef {
        id: ids::GAIN,
        name: "gain",
        kind: NONNEG,
        default: PropertyValue::Double(1.0),
    }
}

const fn biquad_def(id: u32, name: &'static str) -> PropertyDef {
    PropertyDef {
        id,
        name,
        kind: PropertyKind::Biquad,
        default: PropertyValue::Biquad(BiquadDef::identity()),
    }
}

macro_rules! distance_defs {
    ($model:expr, $reference:expr, $max:expr, $rolloff:expr, $boost:expr, $boost_distance:expr) => {
        [
            PropertyDef {
                id: $model,
                name: "distance_model",
                kind: PropertyKind::Int {
                    min: 0,
                    max: DistanceModel::COUNT as i64 - 1,
                },
                default: PropertyValue::Int(DistanceModel::Linear as i64),
            },
            PropertyDef {
                id: $reference,
                name: "distance_ref",
                kind: NONNEG,
                default: PropertyValue::Double(1.0),
            },
            PropertyDef {
                id: $max,
                name: "distance_max",
                kind: NONNEG,
                default: PropertyValue::Double(50.0),
            },
            PropertyDef {
                id: $rolloff,
                name: "rolloff",
                kind: NONNEG,
                default: PropertyValue::Double(1.0),
            },
            PropertyDef {
                id: $boost,
                name: "closeness_boost",
                kind: UNBOUNDED,
                default: PropertyValue::Double(0.0),
            },
            PropertyDef {
                id: $boost_distance,
                name: "closeness_boost_distance",
                kind: NONNEG,
                default: PropertyValue::Double(0.0),
            },
        ]
    };
}

const CONTEXT_DISTANCE: [PropertyDef; 6] = distance_defs!(
    ids::DEFAULT_DISTANCE_MODEL,
    ids::DEFAULT_DISTANCE_REF,
    ids::DEFAULT_DISTANCE_MAX,
    ids::DEFAULT_ROLLOFF,
    ids::DEFAULT_CLOSENESS_BOOST,
    ids::DEFAULT_CLOSENESS_BOOST_DISTANCE
);

static CONTEXT_DEFS: &[PropertyDef] = &[
    gain_def(),
    PropertyDef {
        id: ids::POSITION,
        name: "position",
        kind: PropertyKind::Double3,
        default: PropertyValue::Double3([0.0; 3]),
    },
    PropertyDef {
        id: ids::ORIENTATION,
        name: "orientation",
        kind: PropertyKind::Double6,
        default: PropertyValue::Double6([0.0, 1.0, 0.0, 0.0, 0.0, 1.0]),
    },
    PropertyDef {
        id: ids::DEFAULT_PANNER_STRATEGY,
        name: "default_panner_strategy",
        kind: PropertyKind::Int {
            min: 0,
            max: PannerStrategy::COUNT as i64 - 1,
        },
        default: PropertyValue::Int(PannerStrategy::Stereo as i64),
    },
    CONTEXT_DISTANCE[0],
    CONTEXT_DISTANCE[1],
    CONTEXT_DISTANCE[2],
    CONTEXT_DISTANCE[3],
    CONTEXT_DISTANCE[4],
    CONTEXT_DISTANCE[5],
];

const SOURCE_COMMON: [PropertyDef; 4] = [
    gain_def(),
    biquad_def(ids::FILTER, "filter"),
    biquad_def(ids::FILTER_DIRECT, "filter_direct"),
    biquad_def(ids::FILTER_EFFECTS, "filter_effects"),
];

static DIRECT_SOURCE_DEFS: &[PropertyDef] = &SOURCE_COMMON;

const fn panner_strategy_def() -> PropertyDef {
    PropertyDef {
        id: ids::PANNER_STRATEGY,
        name: "panner_strategy",
        kind: PropertyKind::Int {
            min: 0,
            max: PannerStrategy::COUNT as i64 - 1,
        },
        default: PropertyValue::Int(PannerStrategy::Delegate as i64),
    }
}

static ANGULAR_PANNED_SOURCE_DEFS: &[PropertyDef] = &[
    SOURCE_COMMON[0],
    SOURCE_COMMON[1],
    SOURCE_COMMON[2],
    SOURCE_COMMON[3],
    panner_strategy_def(),
    PropertyDef {
        id: ids::AZIMUTH,
        name: "azimuth",
        kind: PropertyKind::Double {
            min: 0.0,
            max: 360.0,
        },
        default: PropertyValue::Double(0.0),
    },
    PropertyDef {
        id: ids::ELEVATION,
        name: "elevation",
        kind: PropertyKind::Double {
            min: -90.0,
            max: 90.0,
        },
        default: PropertyValue::Double(0.0),
    },
];

static SCALAR_PANNED_SOURCE_DEFS: &[PropertyDef] = &[
    SOURCE_COMMON[0],
    SOURCE_COMMON[1],
    SOURCE_COMMON[2],
    SOURCE_COMMON[3],
    panner_strategy_def(),
    PropertyDef {
        id: ids::PANNING_SCALAR,
        name: "panning_scalar",
        kind: PropertyKind::Double {
            min: -1.0,
            max: 1.0,
        },
        default: PropertyValue::Double(0.0),
    },
];

const SOURCE_DISTANCE: [PropertyDef; 6] = distance_defs!(
    ids::DISTANCE_MODEL,
    ids::DISTANCE_REF,
    ids::DISTANCE_MAX,
    ids::ROLLOFF,
    ids::CLOSENESS_BOOST,
    ids::CLOSENESS_BOOST_DISTANCE
);

static SOURCE_3D_DEFS: &[PropertyDef] = &[
    SOURCE_COMMON[0],
    SOURCE_COMMON[1],
    SOURCE_COMMON[2],
    SOURCE_COMMON[3],
    panner_strategy_def(),
    PropertyDef {
        id: ids::POSITION,
        name: "position",
        kind: PropertyKind::Double3,
        default: PropertyValue::Double3([0.0; 3]),
    },
    PropertyDef {
        id: ids::ORIENTATION,
        name: "orientation",
        kind: PropertyKind::Double6,
        default: PropertyValue::Double6([0.0, 1.0, 0.0, 0.0, 0.0, 1.0]),
    },
    SOURCE_DISTANCE[0],
    SOURCE_DISTANCE[1],
    SOURCE_DISTANCE[2],
    SOURCE_DISTANCE[3],
    SOURCE_DISTANCE[4],
    SOURCE_DISTANCE[5],
];

const fn pitch_bend_def() -> PropertyDef {
    PropertyDef {
        id: ids::PITCH_BEND,
        name: "pitch_bend",
        kind: NONNEG,
        default: PropertyValue::Double(1.0),
    }
}

const fn playback_position_def() -> PropertyDef {
    PropertyDef {
        id: ids::PLAYBACK_POSITION,
        name: "playback_position",
        kind: NONNEG,
        default: PropertyValue::Double(0.0),
    }
}

const fn looping_def() -> PropertyDef {
    PropertyDef {
        id: ids::LOOPING,
        name: "looping",
        kind: PropertyKind::Int { min: 0, max: 1 },
        default: PropertyValue::Int(0),
    }
}

static BUFFER_GENERATOR_DEFS: &[PropertyDef] = &[
    gain_def(),
    pitch_bend_def(),
    PropertyDef {
        id: ids::BUFFER,
        name: "buffer",
        kind: PropertyKind::Object,
        default: PropertyValue::ObjectHandle(0),
    },
    playback_position_def(),
    looping_def(),
];

static STREAMING_GENERATOR_DEFS: &[PropertyDef] = &[
    gain_def(),
    pitch_bend_def(),
    playback_position_def(),
    looping_def(),
];

static SINE_BANK_GENERATOR_DEFS: &[PropertyDef] = &[
    gain_def(),
    pitch_bend_def(),
    PropertyDef {
        id: ids::FREQUENCY,
        name: "frequency",
        kind: PropertyKind::Double {
            min: 0.0,
            max: 22050.0,
        },
        default: PropertyValue::Double(440.0),
    },
];

static NOISE_GENERATOR_DEFS: &[PropertyDef] = &[
    gain_def(),
    pitch_bend_def(),
    PropertyDef {
        id: ids::NOISE_TYPE,
        name: "noise_type",
        kind: PropertyKind::Int {
            min: 0,
            max: resona_dsp::NoiseType::COUNT as i64 - 1,
        },
        default: PropertyValue::Int(resona_dsp::NoiseType::Uniform as i64),
    },
];

const EFFECT_COMMON: [PropertyDef; 2] = [gain_def(), biquad_def(ids::FILTER_INPUT, "filter_input")];

static ECHO_DEFS: &[PropertyDef] = &EFFECT_COMMON;

static FDN_REVERB_DEFS: &[PropertyDef] = &[
    EFFECT_COMMON[0],
    EFFECT_COMMON[1],
    PropertyDef {
        id: ids::MEAN_FREE_PATH,
        name: "mean_free_path",
        kind: PropertyKind::Double { min: 0.0, max: 0.5 },
        default: PropertyValue::Double(0.1),
    },
    PropertyDef {
        id: ids::T60,
        name: "t60",
        kind: PropertyKind::Double {
            min: 0.0,
            max: 100.0,
        },
        default: PropertyValue::Double(0.3),
    },
    PropertyDef {
        id: ids::LATE_REFLECTIONS_DIFFUSION,
        name: "late_reflections_diffusion",
        kind: PropertyKind::Double { min: 0.0, max: 1.0 },
        default: PropertyValue::Double(1.0),
    },
];

static EMPTY_DEFS: &[PropertyDef] = &[];

/// The property table for an object type.
pub fn property_table(object_type: ObjectType) -> &'static [PropertyDef] {
    match object_type {
        ObjectType::Context => CONTEXT_DEFS,
        ObjectType::Buffer | ObjectType::StreamHandle | ObjectType::AutomationBatch => EMPTY_DEFS,
        ObjectType::BufferGenerator => BUFFER_GENERATOR_DEFS,
        ObjectType::StreamingGenerator => STREAMING_GENERATOR_DEFS,
        ObjectType::SineBankGenerator => SINE_BANK_GENERATOR_DEFS,
        ObjectType::NoiseGenerator => NOISE_GENERATOR_DEFS,
        ObjectType::DirectSource => DIRECT_SOURCE_DEFS,
        ObjectType::AngularPannedSource => ANGULAR_PANNED_SOURCE_DEFS,
        ObjectType::ScalarPannedSource => SCALAR_PANNED_SOURCE_DEFS,
        ObjectType::Source3D => SOURCE_3D_DEFS,
        ObjectType::GlobalEcho => ECHO_DEFS,
        ObjectType::GlobalFdnReverb => FDN_REVERB_DEFS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_table_has_unique_ids() {
        let all = [
            ObjectType::Context,
            ObjectType::BufferGenerator,
            ObjectType::StreamingGenerator,
            ObjectType::SineBankGenerator,
            ObjectType::NoiseGenerator,
            ObjectType::DirectSource,
            ObjectType::AngularPannedSource,
            ObjectType::ScalarPannedSource,
            ObjectType::Source3D,
            ObjectType::GlobalEcho,
            ObjectType::GlobalFdnReverb,
        ];
        for object_type in all {
            let defs = property_table(object_type);
            for (i, a) in defs.iter().enumerate() {
                for b in defs.iter().skip(i + 1) {
                    assert_ne!(a.id, b.id, "{object_type:?} duplicates property {}", a.id);
                }
            }
        }
    }

    #[test]
    fn common_objects_have_expected_properties() {
        let common = ObjectCommon::new(7, ObjectType::Source3D);
        assert_eq!(common.handle(), 7);
        assert_eq!(common.bag().get_double(ids::GAIN), 1.0);
        assert_eq!(common.bag().get_double3(ids::POSITION), [0.0; 3]);
        assert_eq!(
            common.bag().get_int(ids::DISTANCE_MODEL),
            DistanceModel::Linear as i64
        );
    }

    #[test]
    fn delete_behavior_round_trips() {
        let common = ObjectCommon::new(1, ObjectType::DirectSource);
        assert!(!common.linger_enabled());
        common.configure_delete_behavior(true, 2.5);
        assert!(common.linger_enabled());
        assert_eq!(common.linger_timeout(), 2.5);
    }
}
