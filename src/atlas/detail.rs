//! JSON rendering of atlas records.
//!
//! `serde_json` objects are key-sorted and every list follows table order,
//! so rendering the same record twice gives byte-identical output.

use indexmap::IndexMap;
use serde_json::{Value, json};

use super::{AtlasData, Entity, EntityKind, MatchCandidate};

fn method_summary(key: &str, method: &Entity) -> Value {
    json!({
        "key": key,
        "full_name": method.full_name,
        "name": method.short_name(),
        "parameters": method.parameters,
        "return_type": method.return_type,
        "is_static": method.is_static,
        "is_classmethod": method.is_classmethod,
        "is_property": method.is_property,
        "docstring": method.docstring,
    })
}

pub fn class_detail(data: &AtlasData, candidate: MatchCandidate<'_>) -> Value {
    let class = candidate.entity;
    let mut methods = Vec::new();
    let mut missing = Vec::new();

    for name in &class.methods {
        let qualified = format!("{}.{}", class.full_name, name);
        let found = data.methods.as_ref().and_then(|table| {
            table
                .get_key_value(name.as_str())
                .or_else(|| table.get_key_value(qualified.as_str()))
        });
        match found {
            Some((key, method)) => methods.push(method_summary(key, method)),
            None => missing.push(name.clone()),
        }
    }

    json!({
        "kind": EntityKind::Class,
        "key": candidate.key,
        "full_name": class.full_name,
        "name": class.short_name(),
        "module": class.module_name,
        "module_found": module_exists(data, class.module_name.as_deref()),
        "docstring": class.docstring,
        "parent_classes": class.parent_classes,
        "methods": methods,
        "missing_methods": missing,
        "match_score": candidate.score,
    })
}

pub fn module_detail(data: &AtlasData, candidate: MatchCandidate<'_>) -> Value {
    let module = candidate.entity;
    let module_name = module.full_name.as_str();

    let classes: Vec<&str> = data
        .classes
        .iter()
        .flatten()
        .filter(|(_, class)| class.module_name.as_deref() == Some(module_name))
        .map(|(_, class)| class.full_name.as_str())
        .collect();

    let functions: Vec<Value> = data
        .methods
        .iter()
        .flatten()
        .filter(|(_, method)| method.owner_name() == Some(module_name))
        .map(|(key, method)| method_summary(key, method))
        .collect();

    json!({
        "kind": EntityKind::Module,
        "key": candidate.key,
        "full_name": module.full_name,
        "name": module.short_name(),
        "docstring": module.docstring,
        "classes": classes,
        "functions": functions,
        "match_score": candidate.score,
    })
}

pub fn method_detail(data: &AtlasData, candidate: MatchCandidate<'_>) -> Value {
    let method = candidate.entity;

    // Owner is a class when the prefix resolves in the class table, otherwise
    // the method is reported as a module-level function.
    let owner_class = method.owner_name().and_then(|owner| {
        data.classes
            .as_ref()
            .and_then(|table| table.get_key_value(owner))
            .map(|(key, _)| key.as_str())
    });

    let mut summary = method_summary(candidate.key, method);
    if let Value::Object(map) = &mut summary {
        map.insert("kind".to_string(), json!(EntityKind::Method));
        map.insert("module".to_string(), json!(method.module_name));
        map.insert("owner_class".to_string(), json!(owner_class));
        map.insert("match_score".to_string(), json!(candidate.score));
    }
    summary
}

/// Flat listing of a table
pub fn listing(kind: EntityKind, table: &IndexMap<String, Entity>) -> Value {
    let names: Vec<&str> = table.values().map(|e| e.full_name.as_str()).collect();
    json!({
        "kind": kind,
        "total": names.len(),
        "names": names,
    })
}

fn module_exists(data: &AtlasData, module_name: Option<&str>) -> bool {
    match (module_name, data.modules.as_ref()) {
        (Some(name), Some(modules)) => modules.contains_key(name),
        _ => false,
    }
}
