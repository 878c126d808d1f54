//! JSON settings loader, behind the `data-loader` feature.

use curdline_core::error::SimError;
use thiserror::Error;

use crate::params::LineParams;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("settings are not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("settings rejected: {0}")]
    Invalid(#[from] SimError),
}

/// Parse and validate line settings from a JSON document. Absent
/// fields take their plant defaults.
pub fn line_params_from_json(json: &str) -> Result<LineParams, LoadError> {
    let params: LineParams = serde_json::from_str(json)?;
    params.validate()?;
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::BoundaryPolicy;

    #[test]
    fn empty_document_gives_plant_defaults() {
        let params = line_params_from_json("{}").unwrap();
        let defaults = LineParams::default();
        assert_eq!(params.salting.salt_recipe, defaults.salting.salt_recipe);
        assert_eq!(params.buffer_capacity, defaults.buffer_capacity);
    }

    #[test]
    fn partial_override_keeps_the_rest() {
        let params = line_params_from_json(
            r#"{"drainer": {"boundary": "Inclusive"}, "buffer_capacity": 4}"#,
        )
        .unwrap();
        assert_eq!(params.drainer.boundary, BoundaryPolicy::Inclusive);
        assert_eq!(params.buffer_capacity, Some(4));
        assert_eq!(
            params.drainer.drain_ticks,
            crate::params::DrainerParams::default().drain_ticks
        );
    }

    #[test]
    fn invalid_settings_are_rejected_after_parse() {
        let mut params = LineParams::default();
        params.salting.salt_recipe = curdline_core::fixed::f64_to_fixed64(2.0);
        let json = serde_json::to_string(&params).unwrap();
        let err = line_params_from_json(&json).unwrap_err();
        assert!(matches!(err, LoadError::Invalid(_)));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            line_params_from_json("{not json").unwrap_err(),
            LoadError::Parse(_)
        ));
    }
}
