//! # Audit Records
//!
//! Validated audit parameters as accepted by the intake endpoint, and the flat
//! string map form that travels on the broker and is written to audit files.
//!
//! The flat form is the unit of exchange between every component: the intake
//! publishes it, the file sink writes it one JSON object per line, and replay
//! workers parse those lines back into [`AuditParameters`].

use crate::{Timestamp, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

pub const USER_DN: &str = "auditUserDN";
pub const QUERY_STRING: &str = "query";
pub const QUERY_SELECTORS: &str = "selectors";
pub const QUERY_AUTHORIZATIONS: &str = "auths";
pub const QUERY_AUDIT_TYPE: &str = "auditType";
pub const QUERY_SECURITY_MARKING_COLVIZ: &str = "auditColumnVisibility";
pub const QUERY_DATE: &str = "queryDate";
pub const QUERY_LOGIC_CLASS: &str = "logicClass";
pub const AUDIT_ID: &str = "auditId";

const REQUIRED_PARAMS: [&str; 5] = [
    USER_DN,
    QUERY_STRING,
    QUERY_AUTHORIZATIONS,
    QUERY_AUDIT_TYPE,
    QUERY_SECURITY_MARKING_COLVIZ,
];

// ============================================================================
// Audit Type
// ============================================================================

/// How a query should be audited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditType {
    /// Do not audit
    None,
    /// Audit before results are returned
    Active,
    /// Audit asynchronously
    Passive,
    /// Audit only to the local log
    LocalOnly,
}

impl AuditType {
    /// Wire name of the audit type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Active => "ACTIVE",
            Self::Passive => "PASSIVE",
            Self::LocalOnly => "LOCALONLY",
        }
    }
}

impl fmt::Display for AuditType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(Self::None),
            "ACTIVE" => Ok(Self::Active),
            "PASSIVE" => Ok(Self::Passive),
            "LOCALONLY" => Ok(Self::LocalOnly),
            other => Err(ValidationError::InvalidFormat {
                field: QUERY_AUDIT_TYPE.to_string(),
                message: format!(
                    "'{}' is not one of NONE, ACTIVE, PASSIVE, LOCALONLY",
                    other
                ),
            }),
        }
    }
}

// ============================================================================
// Audit Parameters
// ============================================================================

/// A validated audit record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditParameters {
    pub user_dn: String,
    pub query: String,
    pub selectors: Option<Vec<String>>,
    /// Comma separated, trimmed, no empty entries
    pub auths: String,
    pub audit_type: AuditType,
    pub column_visibility: String,
    pub query_date: Timestamp,
    pub logic_class: Option<String>,
    pub audit_id: String,
}

impl AuditParameters {
    /// Names of the parameters every audit request must carry
    pub fn required_parameters() -> &'static [&'static str] {
        &REQUIRED_PARAMS
    }

    /// Validate multi-valued request parameters into an audit record.
    ///
    /// Required parameters must appear exactly once. A missing or empty
    /// `auditId` is replaced by a random UUID and a missing `queryDate`
    /// defaults to now.
    pub fn from_params(params: &HashMap<String, Vec<String>>) -> Result<Self, ValidationError> {
        let user_dn = single_required(params, USER_DN)?;
        let query = single_required(params, QUERY_STRING)?;

        let auths = normalize_auths(&single_required(params, QUERY_AUTHORIZATIONS)?);
        if auths.is_empty() {
            return Err(ValidationError::Required {
                field: QUERY_AUTHORIZATIONS.to_string(),
            });
        }

        let audit_type = single_required(params, QUERY_AUDIT_TYPE)?.parse::<AuditType>()?;
        let column_visibility = single_required(params, QUERY_SECURITY_MARKING_COLVIZ)?;

        let query_date = match first_value(params, QUERY_DATE) {
            Some(raw) => parse_query_date(raw)?,
            None => Timestamp::now(),
        };

        let selectors = params.get(QUERY_SELECTORS).map(|values| {
            values
                .iter()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect::<Vec<_>>()
        });

        let logic_class = first_value(params, QUERY_LOGIC_CLASS).map(str::to_string);

        let audit_id = first_value(params, AUDIT_ID)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(Self {
            user_dn,
            query,
            selectors,
            auths,
            audit_type,
            column_visibility,
            query_date,
            logic_class,
            audit_id,
        })
    }

    /// Rebuild an audit record from its flat map form
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, ValidationError> {
        let mut params: HashMap<String, Vec<String>> = map
            .iter()
            .filter(|(key, _)| key.as_str() != QUERY_SELECTORS)
            .map(|(key, value)| (key.clone(), vec![value.clone()]))
            .collect();

        if let Some(selectors) = map.get(QUERY_SELECTORS) {
            params.insert(
                QUERY_SELECTORS.to_string(),
                selectors.split(',').map(str::to_string).collect(),
            );
        }

        Self::from_params(&params)
    }

    /// Flatten into the string map that travels on the broker
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert(QUERY_DATE.to_string(), self.query_date.as_millis().to_string());
        map.insert(USER_DN.to_string(), self.user_dn.clone());
        map.insert(QUERY_STRING.to_string(), self.query.clone());
        if let Some(selectors) = &self.selectors {
            map.insert(QUERY_SELECTORS.to_string(), selectors.join(","));
        }
        map.insert(QUERY_AUTHORIZATIONS.to_string(), self.auths.clone());
        map.insert(
            QUERY_AUDIT_TYPE.to_string(),
            self.audit_type.as_str().to_string(),
        );
        map.insert(
            QUERY_SECURITY_MARKING_COLVIZ.to_string(),
            self.column_visibility.clone(),
        );
        map.insert(AUDIT_ID.to_string(), self.audit_id.clone());
        if let Some(logic_class) = &self.logic_class {
            map.insert(QUERY_LOGIC_CLASS.to_string(), logic_class.clone());
        }
        map
    }
}

impl fmt::Display for AuditParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[userDN={}, query={}, selectors={:?}, auths={}, auditType={}, colviz={}, logicClass={}, auditId={}]",
            self.user_dn,
            self.query,
            self.selectors,
            self.auths,
            self.audit_type,
            self.column_visibility,
            self.logic_class.as_deref().unwrap_or("none"),
            self.audit_id
        )
    }
}

/// Split on commas, trim, drop empties and re-join
pub fn normalize_auths(raw: &str) -> String {
    raw.split(',')
        .map(str::trim)
        .filter(|auth| !auth.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

fn single_required(
    params: &HashMap<String, Vec<String>>,
    field: &str,
) -> Result<String, ValidationError> {
    let values = params.get(field).ok_or_else(|| ValidationError::Required {
        field: field.to_string(),
    })?;

    match values.as_slice() {
        [value] => Ok(value.clone()),
        _ => Err(ValidationError::SingleValue {
            field: field.to_string(),
        }),
    }
}

fn first_value<'a>(params: &'a HashMap<String, Vec<String>>, field: &str) -> Option<&'a str> {
    params
        .get(field)
        .and_then(|values| values.first())
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

fn parse_query_date(raw: &str) -> Result<Timestamp, ValidationError> {
    let millis = raw
        .trim()
        .parse::<i64>()
        .map_err(|_| ValidationError::InvalidFormat {
            field: QUERY_DATE.to_string(),
            message: format!("'{}' is not epoch milliseconds", raw),
        })?;

    Timestamp::from_millis(millis).map_err(|e| ValidationError::InvalidFormat {
        field: QUERY_DATE.to_string(),
        message: e.to_string(),
    })
}

// ============================================================================
// Broker Message
// ============================================================================

/// Audit record as published to the broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditMessage {
    pub audit_parameters: BTreeMap<String, String>,
}

impl AuditMessage {
    /// Wrap validated parameters for publishing
    pub fn from_parameters(parameters: &AuditParameters) -> Self {
        Self {
            audit_parameters: parameters.to_map(),
        }
    }

    /// Correlation id used to match broker acks, which is the audit id
    pub fn correlation_id(&self) -> Option<&str> {
        self.audit_parameters.get(AUDIT_ID).map(String::as_str)
    }

    /// Validate the carried map back into parameters
    pub fn to_parameters(&self) -> Result<AuditParameters, ValidationError> {
        let map: HashMap<String, String> = self
            .audit_parameters
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        AuditParameters::from_map(&map)
    }
}

#[cfg(test)]
#[path = "audit_tests.rs"]
mod tests;
