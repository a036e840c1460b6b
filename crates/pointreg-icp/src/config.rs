use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    checker::CheckerConfig, error::IcpError, filters::DataFilter, matcher::MatcherConfig,
    minimizer::ErrorMinimizer, outlier::OutlierFilter,
};

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

/// Declarative description of a registration pipeline.
///
/// Example:
///
/// ```
/// use pointreg_icp::IcpConfig;
///
/// let config = IcpConfig::from_json(r#"{
///     "matcher": {"type": "kdtree", "knn": 1},
///     "outlierFilter": {"type": "trimmed", "ratio": 0.8},
///     "errorMinimizer": {"type": "point-to-point"},
///     "checker": {"maxIterations": 20}
/// }"#).unwrap();
/// assert_eq!(config.checker.max_iterations, 20);
/// assert_eq!(config.outlier_filters.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct IcpConfig {
    /// Filters run once on the reading cloud.
    pub reading_filters: Vec<DataFilter>,
    /// Filters run on the reading cloud at every iteration, after it is moved.
    pub reading_step_filters: Vec<DataFilter>,
    /// Filters run once on the reference cloud, before it is indexed.
    pub reference_filters: Vec<DataFilter>,
    /// Nearest neighbor matching.
    pub matcher: MatcherConfig,
    /// Outlier filters, their weights multiply.
    #[serde(alias = "outlierFilter", deserialize_with = "one_or_many")]
    pub outlier_filters: Vec<OutlierFilter>,
    /// Error metric.
    pub error_minimizer: ErrorMinimizer,
    /// Convergence criteria.
    pub checker: CheckerConfig,
    /// Spread matching and accumulation over the rayon pool.
    pub parallel: bool,
    /// Keep the per-iteration records in the result.
    pub record_trace: bool,
}

impl Default for IcpConfig {
    fn default() -> Self {
        Self {
            reading_filters: Vec::new(),
            reading_step_filters: Vec::new(),
            reference_filters: Vec::new(),
            matcher: MatcherConfig::default(),
            outlier_filters: vec![OutlierFilter::default()],
            error_minimizer: ErrorMinimizer::default(),
            checker: CheckerConfig::default(),
            parallel: true,
            record_trace: false,
        }
    }
}

impl IcpConfig {
    /// Parse and validate a JSON document.
    ///
    /// # Errors
    ///
    /// [`IcpError::Configuration`] for malformed documents, unknown keys,
    /// unknown variants and out of range parameters.
    pub fn from_json(json: &str) -> Result<Self, IcpError> {
        let config: IcpConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to a JSON document.
    pub fn to_json(&self) -> Result<String, IcpError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check every parameter.
    pub fn validate(&self) -> Result<(), IcpError> {
        let filters = self
            .reading_filters
            .iter()
            .chain(&self.reading_step_filters)
            .chain(&self.reference_filters);
        for filter in filters {
            filter.validate().map_err(IcpError::Configuration)?;
        }
        self.matcher.validate().map_err(IcpError::Configuration)?;
        for filter in &self.outlier_filters {
            filter.validate().map_err(IcpError::Configuration)?;
        }
        self.checker.validate().map_err(IcpError::Configuration)?;
        Ok(())
    }
}
