//! Conversion of structured values into snapshot trees.
//!
//! serde is the reflection facility here: anything `Serialize` becomes a
//! tree, enums unfold to whatever their serialization says they are, and
//! cyclic values cannot produce a terminating `Serialize` in the first
//! place. On top of that, mapping members following the private-naming
//! convention (a leading underscore) are dropped at every depth, since
//! they describe implementation state rather than observable output.

use serde::Serialize;
use serde_json::Value;

/// Serializes a value into a tree suitable for snapshot matching.
pub fn to_tree<T: Serialize>(value: &T) -> Result<Value, serde_json::Error> {
    let mut tree = serde_json::to_value(value)?;
    strip_private_members(&mut tree);
    Ok(tree)
}

fn strip_private_members(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|key, _| !key.starts_with('_'));
            for child in map.values_mut() {
                strip_private_members(child);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                strip_private_members(item);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_derive::Serialize;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[derive(Serialize)]
    enum State {
        Running,
    }

    #[derive(Serialize)]
    struct Inner {
        name: String,
        _internal: String,
    }

    #[derive(Serialize)]
    struct Outer {
        name: String,
        state: State,
        nested: Inner,
        listed: Vec<Inner>,
    }

    #[test]
    fn structs_become_trees_with_private_members_dropped() {
        let outer = Outer {
            name: "myname".to_string(),
            state: State::Running,
            nested: Inner {
                name: "nestedmyname".to_string(),
                _internal: "n/a".to_string(),
            },
            listed: vec![Inner {
                name: "listedmyname".to_string(),
                _internal: "n/a".to_string(),
            }],
        };

        assert_eq!(
            to_tree(&outer).unwrap(),
            json!({
                "name": "myname",
                "state": "Running",
                "nested": {"name": "nestedmyname"},
                "listed": [{"name": "listedmyname"}],
            })
        );
    }

    #[test]
    fn map_keys_follow_the_same_convention() {
        let mut map = BTreeMap::new();
        map.insert("visible".to_string(), 1);
        map.insert("_hidden".to_string(), 2);
        assert_eq!(to_tree(&map).unwrap(), json!({"visible": 1}));
    }

    #[test]
    fn scalars_pass_through() {
        assert_eq!(to_tree(&42).unwrap(), json!(42));
        assert_eq!(to_tree(&"text").unwrap(), json!("text"));
    }
}
