//! Model name resolution: alias -> canonical `provider/model`, combo
//! expansion, provider alias mapping via the static catalogue.

use promux_common::MachineData;
use promux_providers::catalogue;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderModel {
    /// Canonical provider id.
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedModel {
    Single(ProviderModel),
    Combo {
        name: String,
        members: Vec<ProviderModel>,
    },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("combo {0} has no resolvable members")]
    EmptyCombo(String),
}

pub fn resolve_model(data: &MachineData, requested: &str) -> Result<ResolvedModel, ResolveError> {
    let requested = requested.trim();
    // Aliases first, then combos by either the raw or aliased name.
    let target = data
        .model_aliases
        .get(requested)
        .map(String::as_str)
        .unwrap_or(requested);

    if let Some(combo) = data.combo(target).or_else(|| data.combo(requested)) {
        let members: Vec<ProviderModel> = combo
            .models
            .iter()
            .filter_map(|canonical| split_canonical(data, canonical).ok())
            .collect();
        if members.is_empty() {
            return Err(ResolveError::EmptyCombo(combo.name.clone()));
        }
        return Ok(ResolvedModel::Combo {
            name: combo.name.clone(),
            members,
        });
    }

    split_canonical(data, target).map(ResolvedModel::Single)
}

fn split_canonical(data: &MachineData, name: &str) -> Result<ProviderModel, ResolveError> {
    // A member may itself be an alias.
    let name = data.model_aliases.get(name).map(String::as_str).unwrap_or(name);
    let Some((prefix, model)) = name.split_once('/') else {
        return Err(ResolveError::UnknownModel(name.to_string()));
    };
    let prefix = prefix.trim();
    let model = model.trim();
    if prefix.is_empty() || model.is_empty() {
        return Err(ResolveError::UnknownModel(name.to_string()));
    }
    let spec = catalogue::find(prefix).ok_or_else(|| ResolveError::UnknownProvider(prefix.to_string()))?;
    Ok(ProviderModel {
        provider: spec.id.to_string(),
        model: model.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use promux_common::Combo;

    fn machine() -> MachineData {
        let mut data = MachineData::default();
        data.model_aliases
            .insert("fast".to_string(), "groq/llama-3.3-70b".to_string());
        data.combos.push(Combo {
            name: "best".to_string(),
            models: vec![
                "claude/claude-sonnet-4-5".to_string(),
                "openai/gpt-4o".to_string(),
            ],
        });
        data
    }

    #[test]
    fn alias_resolves_to_canonical_provider() {
        let resolved = resolve_model(&machine(), "fast").unwrap();
        assert_eq!(
            resolved,
            ResolvedModel::Single(ProviderModel {
                provider: "groq".to_string(),
                model: "llama-3.3-70b".to_string()
            })
        );
    }

    #[test]
    fn provider_alias_maps_to_canonical_id() {
        let resolved = resolve_model(&machine(), "claude/claude-sonnet-4-5").unwrap();
        match resolved {
            ResolvedModel::Single(pm) => assert_eq!(pm.provider, "anthropic"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn combo_expands_in_order() {
        let resolved = resolve_model(&machine(), "best").unwrap();
        match resolved {
            ResolvedModel::Combo { name, members } => {
                assert_eq!(name, "best");
                assert_eq!(members.len(), 2);
                assert_eq!(members[0].provider, "anthropic");
                assert_eq!(members[1].provider, "openai");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_names_error() {
        assert!(matches!(
            resolve_model(&machine(), "no-slash"),
            Err(ResolveError::UnknownModel(_))
        ));
        assert!(matches!(
            resolve_model(&machine(), "nobody/model-x"),
            Err(ResolveError::UnknownProvider(_))
        ));
    }
}
