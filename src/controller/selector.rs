//! Label selector formatting for list calls against the leaf

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

/// Render a `LabelSelector` into the string form accepted by list calls,
/// combining match labels and match expressions with commas.
pub fn format_label_selector(selector: &LabelSelector) -> String {
    let mut parts = Vec::new();

    if let Some(labels) = &selector.match_labels {
        for (key, value) in labels {
            parts.push(format!("{key}={value}"));
        }
    }

    if let Some(expressions) = &selector.match_expressions {
        for expr in expressions {
            let values = expr
                .values
                .as_deref()
                .unwrap_or_default()
                .join(",");
            match expr.operator.as_str() {
                "In" => parts.push(format!("{} in ({values})", expr.key)),
                "NotIn" => parts.push(format!("{} notin ({values})", expr.key)),
                "Exists" => parts.push(expr.key.clone()),
                "DoesNotExist" => parts.push(format!("!{}", expr.key)),
                other => {
                    tracing::warn!("Skipping unsupported selector operator {other}");
                }
            }
        }
    }

    parts.join(",")
}
