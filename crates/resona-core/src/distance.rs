//! Distance attenuation models for 3D sources.

use crate::math::db_to_gain;

/// How gain falls off with distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum DistanceModel {
    /// No attenuation.
    None = 0,
    /// Linear falloff between `distance_ref` and `distance_max`.
    #[default]
    Linear = 1,
    /// `(d / ref)^-rolloff`.
    Exponential = 2,
    /// `ref / (ref + rolloff * (d - ref))`.
    Inverse = 3,
}

impl DistanceModel {
    pub const COUNT: i32 = 4;

    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::None),
            1 => Some(Self::Linear),
            2 => Some(Self::Exponential),
            3 => Some(Self::Inverse),
            _ => None,
        }
    }
}

/// Parameters feeding the distance gain computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceParams {
    pub distance: f64,
    pub distance_ref: f64,
    pub distance_max: f64,
    pub rolloff: f64,
    pub closeness_boost: f64,
    pub closeness_boost_distance: f64,
    pub distance_model: DistanceModel,
}

impl Default for DistanceParams {
    fn default() -> Self {
        Self {
            distance: 0.0,
            distance_ref: 1.0,
            distance_max: 50.0,
            rolloff: 1.0,
            closeness_boost: 0.0,
            closeness_boost_distance: 0.0,
            distance_model: DistanceModel::Linear,
        }
    }
}

/// Compute the gain multiplier for a set of distance parameters.
///
/// Sources further away than `closeness_boost_distance` are reduced by
/// `closeness_boost` dB rather than closer sources being boosted, so that
/// distances inside the boost radius never clip attenuation above 1.
pub fn gain_from_distance(params: &DistanceParams) -> f64 {
    let mut mul = match params.distance_model {
        DistanceModel::None => 1.0,
        DistanceModel::Linear => {
            let d = params
                .distance
                .clamp(params.distance_ref, params.distance_max);
            1.0 - params.rolloff * (d - params.distance_ref)
                / (params.distance_max - params.distance_ref)
        }
        DistanceModel::Exponential => {
            if params.distance_ref == 0.0 {
                0.0
            } else {
                (params.distance.max(params.distance_ref) / params.distance_ref)
                    .powf(-params.rolloff)
            }
        }
        DistanceModel::Inverse => {
            if params.distance_ref == 0.0 {
                0.0
            } else {
                params.distance_ref
                    / (params.distance_ref
                        + params.rolloff * params.distance.max(params.distance_ref)
                        - params.distance_ref)
            }
        }
    };

    if params.distance > params.closeness_boost_distance {
        mul *= db_to_gain(-params.closeness_boost);
    }

    mul.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn params(model: DistanceModel, distance: f64) -> DistanceParams {
        DistanceParams {
            distance,
            distance_model: model,
            ..Default::default()
        }
    }

    #[test]
    fn none_model_is_unity() {
        assert_eq!(gain_from_distance(&params(DistanceModel::None, 1000.0)), 1.0);
    }

    #[test]
    fn linear_endpoints() {
        assert_relative_eq!(
            gain_from_distance(&params(DistanceModel::Linear, 1.0)),
            1.0
        );
        assert_relative_eq!(
            gain_from_distance(&params(DistanceModel::Linear, 50.0)),
            0.0
        );
        let mid = gain_from_distance(&params(DistanceModel::Linear, 25.5));
        assert_relative_eq!(mid, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn attenuation_is_monotonic() {
        for model in [DistanceModel::Exponential, DistanceModel::Inverse] {
            let near = gain_from_distance(&params(model, 2.0));
            let far = gain_from_distance(&params(model, 20.0));
            assert!(near > far, "{model:?}: {near} <= {far}");
        }
    }

    #[test]
    fn closeness_boost_reduces_far_sources() {
        let mut p = params(DistanceModel::None, 10.0);
        p.closeness_boost = 6.0;
        p.closeness_boost_distance = 5.0;
        let far = gain_from_distance(&p);
        p.distance = 1.0;
        let near = gain_from_distance(&p);
        assert!(far < near);
    }
}
