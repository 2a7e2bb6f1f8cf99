//! Built-in resource kinds.
//!
//! Identity fields (`project`, `location` and the leaf id) are rebuilt from
//! the remote identifier rather than copied from the response body, so they
//! are marked non-importable. `labels` is owned by the caller and never
//! imported; `terraform_labels` is the server-side merged label set.

use serde_json::json;

use super::types::{FieldSpec, FieldType, ResourceSchema};

/// Kind name of Dataplex data scans.
pub const DATAPLEX_DATASCAN: &str = "dataplex_datascan";

/// Kind name of Model Armor templates.
pub const MODEL_ARMOR_TEMPLATE: &str = "model_armor_template";

/// Returns every built-in schema.
#[must_use]
pub fn all() -> Vec<ResourceSchema> {
    vec![dataplex_datascan(), model_armor_template()]
}

/// Schema for a data-quality or data-profile scan.
#[must_use]
pub fn dataplex_datascan() -> ResourceSchema {
    ResourceSchema::new(
        DATAPLEX_DATASCAN,
        "projects/{project}/locations/{location}/dataScans/{data_scan_id}",
    )
    .with_create_id_param("dataScanId")
    .with_field(FieldSpec::immutable("project", FieldType::String).not_importable())
    .with_field(FieldSpec::immutable("location", FieldType::String).not_importable())
    .with_field(FieldSpec::immutable("data_scan_id", FieldType::String).not_importable())
    .with_field(FieldSpec::updatable("display_name", FieldType::String))
    .with_field(FieldSpec::updatable("description", FieldType::String))
    .with_field(FieldSpec::updatable("labels", FieldType::Object).not_importable())
    .with_field(FieldSpec::immutable("data.resource", FieldType::String))
    .with_field(FieldSpec::immutable("data.entity", FieldType::String))
    .with_field(FieldSpec::updatable("execution_spec.trigger", FieldType::Object))
    .with_field(FieldSpec::immutable("execution_spec.field", FieldType::String))
    .with_field(FieldSpec::updatable(
        "data_quality_spec.sampling_percent",
        FieldType::Number,
    ))
    .with_field(FieldSpec::updatable("data_quality_spec.row_filter", FieldType::String))
    .with_field(
        FieldSpec::updatable("data_quality_spec.catalog_publishing_enabled", FieldType::Bool)
            .with_default(json!(false)),
    )
    .with_field(FieldSpec::updatable("data_quality_spec.rules", FieldType::List))
    .with_field(FieldSpec::updatable(
        "data_quality_spec.post_scan_actions",
        FieldType::Object,
    ))
    .with_field(FieldSpec::updatable("data_profile_spec", FieldType::Object))
    .with_field(FieldSpec::computed("terraform_labels", FieldType::Object))
    .with_field(FieldSpec::computed("name", FieldType::String))
    .with_field(FieldSpec::computed("uid", FieldType::String))
    .with_field(FieldSpec::computed("state", FieldType::String))
    .with_field(FieldSpec::computed("type", FieldType::String))
    .with_field(FieldSpec::computed("create_time", FieldType::String))
    .with_field(FieldSpec::computed("update_time", FieldType::String))
}

/// Schema for a content-safety screening template.
#[must_use]
pub fn model_armor_template() -> ResourceSchema {
    ResourceSchema::new(
        MODEL_ARMOR_TEMPLATE,
        "projects/{project}/locations/{location}/templates/{template_id}",
    )
    .with_create_id_param("templateId")
    .with_field(FieldSpec::immutable("project", FieldType::String).not_importable())
    .with_field(FieldSpec::immutable("location", FieldType::String).not_importable())
    .with_field(FieldSpec::immutable("template_id", FieldType::String).not_importable())
    .with_field(FieldSpec::updatable("labels", FieldType::Object).not_importable())
    .with_field(FieldSpec::updatable("filter_config.rai_settings", FieldType::Object))
    .with_field(FieldSpec::updatable("filter_config.sdp_settings", FieldType::Object))
    .with_field(FieldSpec::updatable(
        "filter_config.pi_and_jailbreak_filter_settings",
        FieldType::Object,
    ))
    .with_field(FieldSpec::updatable(
        "filter_config.malicious_uri_filter_settings",
        FieldType::Object,
    ))
    .with_field(FieldSpec::updatable(
        "template_metadata.custom_llm_response_safety_error_message",
        FieldType::String,
    ))
    .with_field(FieldSpec::updatable(
        "template_metadata.log_template_operations",
        FieldType::Bool,
    ))
    .with_field(FieldSpec::updatable(
        "template_metadata.log_sanitize_operations",
        FieldType::Bool,
    ))
    .with_field(FieldSpec::updatable(
        "template_metadata.multi_language_detection",
        FieldType::Object,
    ))
    .with_field(FieldSpec::updatable(
        "template_metadata.ignore_partial_invocation_failures",
        FieldType::Bool,
    ))
    .with_field(FieldSpec::updatable(
        "template_metadata.custom_prompt_safety_error_code",
        FieldType::Integer,
    ))
    .with_field(FieldSpec::updatable(
        "template_metadata.custom_prompt_safety_error_message",
        FieldType::String,
    ))
    .with_field(FieldSpec::updatable(
        "template_metadata.custom_llm_response_safety_error_code",
        FieldType::Integer,
    ))
    .with_field(FieldSpec::updatable(
        "template_metadata.enforcement_type",
        FieldType::String,
    ))
    .with_field(FieldSpec::computed("terraform_labels", FieldType::Object))
    .with_field(FieldSpec::computed("name", FieldType::String))
    .with_field(FieldSpec::computed("create_time", FieldType::String))
    .with_field(FieldSpec::computed("update_time", FieldType::String))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Mutability;

    #[test]
    fn test_builtin_schemas_are_valid() {
        for schema in all() {
            schema.validate().unwrap();
        }
    }

    #[test]
    fn test_datascan_location_is_immutable() {
        let schema = dataplex_datascan();
        let location = schema.field("location").unwrap();
        assert_eq!(location.mutability, Mutability::Immutable);
        assert!(!location.importable);
    }

    #[test]
    fn test_template_metadata_is_updatable() {
        let schema = model_armor_template();
        assert!(
            schema
                .fields
                .iter()
                .filter(|f| f.path.starts_with("template_metadata."))
                .all(|f| f.mutability == Mutability::Updatable)
        );
    }
}
