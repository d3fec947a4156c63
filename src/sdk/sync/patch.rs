use crate::sdk::error::SyncError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// 把局部字段补丁合并到实体上
///
/// 补丁必须是 JSON 对象，只能包含实体已有的字段，且不能修改 `id` 和所属用户字段。
pub fn apply_patch<T>(item: &T, patch: &Value, owner_field: &str) -> Result<T, SyncError>
where
    T: Serialize + DeserializeOwned,
{
    let fields = patch
        .as_object()
        .ok_or_else(|| SyncError::InvalidPatch("patch must be a JSON object".to_string()))?;

    let mut value = serde_json::to_value(item)
        .map_err(|e| SyncError::InvalidPatch(format!("entity is not serializable: {}", e)))?;
    let obj = value
        .as_object_mut()
        .ok_or_else(|| SyncError::InvalidPatch("entity is not a JSON object".to_string()))?;

    for (key, field) in fields {
        if key == "id" || key == owner_field {
            return Err(SyncError::InvalidPatch(format!(
                "field `{}` cannot be patched",
                key
            )));
        }
        if !obj.contains_key(key) {
            return Err(SyncError::InvalidPatch(format!("unknown field `{}`", key)));
        }
        obj.insert(key.clone(), field.clone());
    }

    serde_json::from_value(value).map_err(|e| SyncError::InvalidPatch(e.to_string()))
}

/// 撤销一次补丁
///
/// `prior` 到 `written` 之间变化过的顶层字段，若在 `current` 中仍等于 `written`
/// 的值，则还原为 `prior` 的值。返回 `None` 表示没有字段需要还原。
pub fn revert_fields<T>(current: &T, prior: &T, written: &T) -> Result<Option<T>, SyncError>
where
    T: Serialize + DeserializeOwned,
{
    let mut current_obj = to_object(current)?;
    let prior_obj = to_object(prior)?;
    let written_obj = to_object(written)?;

    let mut changed = false;
    for (key, written_value) in &written_obj {
        let prior_value = prior_obj.get(key).unwrap_or(&Value::Null);
        if prior_value == written_value {
            continue;
        }
        if current_obj.get(key) == Some(written_value) {
            current_obj.insert(key.clone(), prior_value.clone());
            changed = true;
        }
    }
    if !changed {
        return Ok(None);
    }
    serde_json::from_value(Value::Object(current_obj))
        .map(Some)
        .map_err(|e| SyncError::InvalidPatch(e.to_string()))
}

fn to_object<T: Serialize>(item: &T) -> Result<Map<String, Value>, SyncError> {
    match serde_json::to_value(item) {
        Ok(Value::Object(obj)) => Ok(obj),
        Ok(_) => Err(SyncError::InvalidPatch(
            "entity is not a JSON object".to_string(),
        )),
        Err(e) => Err(SyncError::InvalidPatch(format!(
            "entity is not serializable: {}",
            e
        ))),
    }
}
