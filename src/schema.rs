/// Backend configuration schemas for cidgate.
///
/// Every backend type declares its configuration as data: an ordered set of
/// field specifications consumed uniformly by the validator, the registry,
/// and any configuration UI. Schemas are static and loaded once; unknown
/// type strings are rejected at the registry boundary.
///
/// Validation is a pure function with no network or storage access.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

/// The set of supported backend types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    ObjectStore,
    ModelHub,
    SharedDrive,
    Gateway,
    DecentralizedRetrieval,
    GenericIpfs,
}

impl BackendKind {
    pub const ALL: [BackendKind; 6] = [
        BackendKind::ObjectStore,
        BackendKind::ModelHub,
        BackendKind::SharedDrive,
        BackendKind::Gateway,
        BackendKind::DecentralizedRetrieval,
        BackendKind::GenericIpfs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::ObjectStore => "object-store",
            BackendKind::ModelHub => "model-hub",
            BackendKind::SharedDrive => "shared-drive",
            BackendKind::Gateway => "gateway",
            BackendKind::DecentralizedRetrieval => "decentralized-retrieval",
            BackendKind::GenericIpfs => "generic-ipfs",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == s)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            BackendKind::ObjectStore => "S3-compatible object store",
            BackendKind::ModelHub => "Model hub",
            BackendKind::SharedDrive => "Shared drive",
            BackendKind::Gateway => "HTTP gateway",
            BackendKind::DecentralizedRetrieval => "Decentralized retrieval",
            BackendKind::GenericIpfs => "IPFS node",
        }
    }

    /// The field schema for this backend type.
    pub fn schema(&self) -> &'static [FieldSpec] {
        match self {
            BackendKind::ObjectStore => OBJECT_STORE_SCHEMA,
            BackendKind::ModelHub => MODEL_HUB_SCHEMA,
            BackendKind::SharedDrive => SHARED_DRIVE_SCHEMA,
            BackendKind::Gateway => GATEWAY_SCHEMA,
            BackendKind::DecentralizedRetrieval => RETRIEVAL_SCHEMA,
            BackendKind::GenericIpfs => GENERIC_IPFS_SCHEMA,
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structural constraint on a field's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldShape {
    Text,
    Url,
}

/// Specification for a single configuration field.
#[derive(Debug, Clone, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    pub required: bool,
    pub secret: bool,
    pub default: Option<&'static str>,
    pub shape: FieldShape,
}

const OBJECT_STORE_SCHEMA: &[FieldSpec] = &[
    FieldSpec {
        name: "endpoint",
        required: true,
        secret: false,
        default: None,
        shape: FieldShape::Url,
    },
    FieldSpec {
        name: "bucket",
        required: true,
        secret: false,
        default: None,
        shape: FieldShape::Text,
    },
    FieldSpec {
        name: "access_key",
        required: true,
        secret: true,
        default: None,
        shape: FieldShape::Text,
    },
    FieldSpec {
        name: "secret_key",
        required: false,
        secret: true,
        default: None,
        shape: FieldShape::Text,
    },
    FieldSpec {
        name: "region",
        required: false,
        secret: false,
        default: Some("us-east-1"),
        shape: FieldShape::Text,
    },
];

const MODEL_HUB_SCHEMA: &[FieldSpec] = &[
    FieldSpec {
        name: "endpoint",
        required: false,
        secret: false,
        default: Some("https://huggingface.co"),
        shape: FieldShape::Url,
    },
    FieldSpec {
        name: "token",
        required: false,
        secret: true,
        default: None,
        shape: FieldShape::Text,
    },
];

const SHARED_DRIVE_SCHEMA: &[FieldSpec] = &[
    FieldSpec {
        name: "api_base",
        required: false,
        secret: false,
        default: Some("https://www.googleapis.com"),
        shape: FieldShape::Url,
    },
    FieldSpec {
        name: "access_token",
        required: true,
        secret: true,
        default: None,
        shape: FieldShape::Text,
    },
    FieldSpec {
        name: "root_folder",
        required: false,
        secret: false,
        default: None,
        shape: FieldShape::Text,
    },
];

const GATEWAY_SCHEMA: &[FieldSpec] = &[
    FieldSpec {
        name: "base_url",
        required: true,
        secret: false,
        default: None,
        shape: FieldShape::Url,
    },
    FieldSpec {
        name: "auth_token",
        required: false,
        secret: true,
        default: None,
        shape: FieldShape::Text,
    },
];

const RETRIEVAL_SCHEMA: &[FieldSpec] = &[
    FieldSpec {
        name: "gateway_url",
        required: true,
        secret: false,
        default: None,
        shape: FieldShape::Url,
    },
    FieldSpec {
        name: "api_url",
        required: false,
        secret: false,
        default: None,
        shape: FieldShape::Url,
    },
    FieldSpec {
        name: "auth_token",
        required: false,
        secret: true,
        default: None,
        shape: FieldShape::Text,
    },
];

const GENERIC_IPFS_SCHEMA: &[FieldSpec] = &[
    FieldSpec {
        name: "api_url",
        required: false,
        secret: false,
        default: Some("http://127.0.0.1:5001"),
        shape: FieldShape::Url,
    },
    FieldSpec {
        name: "gateway_url",
        required: false,
        secret: false,
        default: Some("http://127.0.0.1:8080"),
        shape: FieldShape::Url,
    },
];

/// Machine-readable reason a field failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldErrorCode {
    MissingRequired,
    UnknownField,
    InvalidValue,
}

/// A single field-level validation failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub code: FieldErrorCode,
    pub message: String,
}

impl FieldError {
    pub fn missing(field: &str) -> Self {
        Self {
            field: field.to_string(),
            code: FieldErrorCode::MissingRequired,
            message: format!("required field `{field}` is missing"),
        }
    }

    pub fn unknown(field: &str) -> Self {
        Self {
            field: field.to_string(),
            code: FieldErrorCode::UnknownField,
            message: format!("field `{field}` is not declared for this backend type"),
        }
    }

    pub fn invalid(field: &str, detail: &str) -> Self {
        Self {
            field: field.to_string(),
            code: FieldErrorCode::InvalidValue,
            message: format!("field `{field}` is invalid: {detail}"),
        }
    }
}

/// Validate a field map against the schema for `kind`.
///
/// Reports every failure rather than stopping at the first, so callers can
/// surface the full set of problems in one round trip.
pub fn validate(kind: BackendKind, fields: &BTreeMap<String, String>) -> Result<(), Vec<FieldError>> {
    let schema = kind.schema();
    let mut errors = Vec::new();

    for spec in schema {
        match fields.get(spec.name) {
            None => {
                if spec.required {
                    errors.push(FieldError::missing(spec.name));
                }
            }
            Some(value) => {
                if value.trim().is_empty() {
                    if spec.required {
                        errors.push(FieldError::invalid(spec.name, "must not be empty"));
                    }
                } else if spec.shape == FieldShape::Url && Url::parse(value).is_err() {
                    errors.push(FieldError::invalid(spec.name, "must be a valid URL"));
                }
            }
        }
    }

    // Reject undeclared fields so a typo never becomes inert configuration.
    for name in fields.keys() {
        if !schema.iter().any(|spec| spec.name == name) {
            errors.push(FieldError::unknown(name));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Fill in declared defaults for fields the caller omitted.
pub fn apply_defaults(kind: BackendKind, fields: &mut BTreeMap<String, String>) {
    for spec in kind.schema() {
        if let Some(default) = spec.default {
            fields
                .entry(spec.name.to_string())
                .or_insert_with(|| default.to_string());
        }
    }
}

const MASK: &str = "****";

/// Mask a single secret value. Long values keep their last four characters
/// so an operator can tell two credentials apart without seeing either.
fn mask_value(value: &str) -> String {
    if value.chars().count() >= 8 {
        let tail: String = value.chars().skip(value.chars().count() - 4).collect();
        format!("{MASK}{tail}")
    } else {
        MASK.to_string()
    }
}

/// Return a copy of `fields` with every secret field masked.
pub fn mask_fields(
    kind: BackendKind,
    fields: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let schema = kind.schema();
    fields
        .iter()
        .map(|(name, value)| {
            let secret = schema.iter().any(|s| s.name == name && s.secret);
            let value = if secret {
                mask_value(value)
            } else {
                value.clone()
            };
            (name.clone(), value)
        })
        .collect()
}

/// Static catalog entry for configuration UIs.
#[derive(Debug, Clone, Serialize)]
pub struct TypeDescriptor {
    pub name: &'static str,
    pub display: &'static str,
    pub schema: &'static [FieldSpec],
}

/// All supported backend types with their schemas, in declaration order.
pub fn list_types() -> Vec<TypeDescriptor> {
    BackendKind::ALL
        .iter()
        .map(|kind| TypeDescriptor {
            name: kind.as_str(),
            display: kind.display_name(),
            schema: kind.schema(),
        })
        .collect()
}
