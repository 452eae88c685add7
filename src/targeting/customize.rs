//! Customizer (C5): merges a winning target's options onto a Bundle's
//! defaults, then runs the two Helm-values substitution passes spec §4.5
//! describes - legacy `global.fleet.clusterLabels.<key>` string replacement,
//! followed by `${ ... }` template expressions unless `disablePreprocess` is
//! set. The recursive-walk shape follows the teacher's
//! `WithInterpolatedVersion` trait in `spec_editing.rs`, generalized from a
//! single `$SHA` replacement to an arbitrary label/template lookup.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::types::bundle::BundleDeploymentOptions;

/// Everything a customization needs to know about the target cluster.
#[derive(Clone, Debug, Default)]
pub struct ClusterContext {
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    /// Arbitrary per-cluster values exposed as `.ClusterValues.*` (spec §4.5).
    pub values: Value,
}

/// Merges `target_options` onto `base`, then runs both substitution passes
/// over the merged Helm values (spec §4.5). Returns the fully customized
/// options ready to feed `content_hash::compute`.
pub fn customize(
    base: &BundleDeploymentOptions,
    target_options: Option<&BundleDeploymentOptions>,
    ctx: &ClusterContext,
) -> BundleDeploymentOptions {
    let mut merged = match target_options {
        Some(over) => base.merged_with(over),
        None => base.clone(),
    };

    if let Some(helm) = merged.helm.as_mut() {
        helm.values = substitute_legacy_labels(&helm.values, &ctx.labels);
        if !helm.disable_preprocess {
            helm.values = substitute_templates(&helm.values, ctx);
        }
    }

    merged
}

/// Deep-merges `over` onto `base`: objects merge key-by-key (recursing),
/// anything else in `over` simply replaces `base`'s value outright.
pub fn deep_merge_json(base: &Value, over: &Value) -> Value {
    match (base, over) {
        (Value::Object(base_map), Value::Object(over_map)) => {
            let mut out = base_map.clone();
            for (k, v) in over_map {
                let merged = match out.get(k) {
                    Some(existing) => deep_merge_json(existing, v),
                    None => v.clone(),
                };
                out.insert(k.clone(), merged);
            }
            Value::Object(out)
        }
        _ => over.clone(),
    }
}

/// Walks `value`, replacing any leaf string exactly matching
/// `global.fleet.clusterLabels.<key>` with the cluster's label named `key`.
/// Only scalar *values* are matched - the open question in spec §9 on
/// whether map keys should also be substituted is resolved here by limiting
/// the rewrite to values (documented in DESIGN.md).
pub fn substitute_legacy_labels(value: &Value, labels: &BTreeMap<String, String>) -> Value {
    const PREFIX: &str = "global.fleet.clusterLabels.";
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_legacy_labels(v, labels)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| substitute_legacy_labels(v, labels)).collect())
        }
        Value::String(s) => match s.strip_prefix(PREFIX) {
            Some(key) => match labels.get(key) {
                Some(replacement) => Value::String(replacement.clone()),
                None => value.clone(),
            },
            None => value.clone(),
        },
        _ => value.clone(),
    }
}

fn template_expr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)]
    RE.get_or_init(|| Regex::new(r"\$\{\s*([^}]*?)\s*\}").expect("static regex is valid"))
}

/// Walks `value`, expanding `${ ... }` expressions in every leaf string
/// against `ctx` (spec §4.5's second substitution pass).
pub fn substitute_templates(value: &Value, ctx: &ClusterContext) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_templates(v, ctx)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute_templates(v, ctx)).collect()),
        Value::String(s) => Value::String(render_template_string(s, ctx)),
        _ => value.clone(),
    }
}

fn render_template_string(input: &str, ctx: &ClusterContext) -> String {
    template_expr_re()
        .replace_all(input, |caps: &regex::Captures| {
            eval_expr(&caps[1], ctx).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Evaluates one `path | fn1 | fn2 "arg"` expression, where `path` is a
/// dotted field reference into the cluster context and each stage after a
/// `|` is one of the handful of sprig functions Fleet's own docs document as
/// commonly used in this grammar (spec §4.5).
fn eval_expr(expr: &str, ctx: &ClusterContext) -> Option<String> {
    let mut stages = expr.split('|').map(str::trim);
    let path = stages.next()?;
    let mut current = resolve_path(path, ctx)?;
    for stage in stages {
        current = apply_function(stage, &current)?;
    }
    Some(current)
}

fn resolve_path(path: &str, ctx: &ClusterContext) -> Option<String> {
    let path = path.strip_prefix('.')?;
    let mut parts = path.split('.');
    match parts.next()? {
        "ClusterNamespace" => Some(ctx.namespace.clone()),
        "ClusterName" => Some(ctx.name.clone()),
        "ClusterLabels" => parts.next().and_then(|k| ctx.labels.get(k).cloned()),
        "ClusterAnnotations" => parts.next().and_then(|k| ctx.annotations.get(k).cloned()),
        "ClusterValues" => {
            let mut v = &ctx.values;
            for part in parts {
                v = v.get(part)?;
            }
            Some(match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
        }
        _ => None,
    }
}

fn apply_function(stage: &str, input: &str) -> Option<String> {
    let mut parts = stage.splitn(2, char::is_whitespace);
    let name = parts.next()?.trim();
    let rest = parts.next().map(str::trim).unwrap_or("");
    match name {
        "upper" => Some(input.to_uppercase()),
        "lower" => Some(input.to_lowercase()),
        "trim" => Some(input.trim().to_string()),
        "quote" => Some(format!("\"{input}\"")),
        "default" => {
            if input.is_empty() {
                Some(rest.trim_matches('"').to_string())
            } else {
                Some(input.to_string())
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> ClusterContext {
        ClusterContext {
            namespace: "fleet-default".to_string(),
            name: "c1".to_string(),
            labels: BTreeMap::from([("envType".to_string(), "dev".to_string())]),
            annotations: BTreeMap::new(),
            values: json!({}),
        }
    }

    #[test]
    fn template_substitutes_cluster_label() {
        let rendered = render_template_string("${ .ClusterLabels.envType }", &ctx());
        assert_eq!(rendered, "dev");
    }

    #[test]
    fn template_pipes_through_upper() {
        let rendered = render_template_string("${ .ClusterLabels.envType | upper }", &ctx());
        assert_eq!(rendered, "DEV");
    }

    #[test]
    fn unresolvable_expression_is_left_untouched() {
        let rendered = render_template_string("${ .ClusterLabels.missing }", &ctx());
        assert_eq!(rendered, "${ .ClusterLabels.missing }");
    }

    #[test]
    fn legacy_label_substitution_replaces_scalar_values_only() {
        let value = json!({
            "envLabel": "global.fleet.clusterLabels.envType",
            "nested": {"global.fleet.clusterLabels.envType": "unchanged-key"},
        });
        let labels = BTreeMap::from([("envType".to_string(), "dev".to_string())]);
        let out = substitute_legacy_labels(&value, &labels);
        assert_eq!(out["envLabel"], json!("dev"));
        // map keys are never rewritten - only values (documented open-question choice).
        assert_eq!(out["nested"]["global.fleet.clusterLabels.envType"], json!("unchanged-key"));
    }

    #[test]
    fn disable_preprocess_leaves_template_literal() {
        let mut base = BundleDeploymentOptions::default();
        let mut helm = crate::types::bundle::HelmOptions::default();
        helm.values = json!({"envLabel": "${ .ClusterLabels.envType }"});
        helm.disable_preprocess = true;
        base.helm = Some(helm);

        let out = customize(&base, None, &ctx());
        assert_eq!(
            out.helm.unwrap().values["envLabel"],
            json!("${ .ClusterLabels.envType }")
        );
    }

    #[test]
    fn preprocess_enabled_substitutes_template() {
        let mut base = BundleDeploymentOptions::default();
        let mut helm = crate::types::bundle::HelmOptions::default();
        helm.values = json!({"envLabel": "${ .ClusterLabels.envType }"});
        base.helm = Some(helm);

        let out = customize(&base, None, &ctx());
        assert_eq!(out.helm.unwrap().values["envLabel"], json!("dev"));
    }
}
