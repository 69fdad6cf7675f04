//! Action schemes: which input, in which phase, triggers which action
//!
//! The configuration describes definitions, each holding named schemes made of
//! [`InputActionMap`]s. [`SchemeBook::build`] resolves every map against the
//! input catalog and the action registry once, so a read cycle only does a
//! hash lookup per activation.

use super::registry::{ActionHandler, ActionRegistry};
use crate::config::ValidationIssue;
use crate::input::{DeviceFamily, InputCatalog, InputId, Phase};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::{self, Display};
use std::sync::Arc;
use tracing::debug;

/// Binding of one input to an action
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputActionMap {
    pub input: InputId,
    pub family: DeviceFamily,
    pub action: String,
    /// Trigger phases; the action's defaults when omitted
    #[serde(default)]
    pub phases: Option<BTreeSet<Phase>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemeConfig {
    pub name: String,
    #[serde(default)]
    pub maps: Vec<InputActionMap>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionConfig {
    pub name: String,
    #[serde(default)]
    pub schemes: Vec<SchemeConfig>,
}

/// The (definition, scheme) pair governing a user's action mapping
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActiveInputScheme {
    pub definition: String,
    pub scheme: String,
}

impl ActiveInputScheme {
    pub fn new(definition: impl Into<String>, scheme: impl Into<String>) -> Self {
        Self {
            definition: definition.into(),
            scheme: scheme.into(),
        }
    }
}

impl Display for ActiveInputScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.definition, self.scheme)
    }
}

/// A map with its handler and effective phases
#[derive(Clone)]
pub struct ResolvedBinding {
    pub map: InputActionMap,
    pub phases: BTreeSet<Phase>,
    pub handler: ActionHandler,
}

impl fmt::Debug for ResolvedBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedBinding")
            .field("map", &self.map)
            .field("phases", &self.phases)
            .finish_non_exhaustive()
    }
}

type BindingKey = (DeviceFamily, InputId, Phase);

#[derive(Debug)]
pub struct ResolvedScheme {
    id: ActiveInputScheme,
    bindings: HashMap<BindingKey, Arc<ResolvedBinding>>,
}

impl ResolvedScheme {
    /// A scheme that binds nothing
    pub fn empty(id: ActiveInputScheme) -> Self {
        Self {
            id,
            bindings: HashMap::new(),
        }
    }

    pub fn id(&self) -> &ActiveInputScheme {
        &self.id
    }

    pub fn lookup(
        &self,
        family: DeviceFamily,
        input: &InputId,
        phase: Phase,
    ) -> Option<&ResolvedBinding> {
        self.bindings
            .get(&(family, input.clone(), phase))
            .map(Arc::as_ref)
    }

    /// Number of (input, phase) pairs bound
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Every compiled scheme, addressable by [`ActiveInputScheme`]
#[derive(Debug, Default)]
pub struct SchemeBook {
    schemes: HashMap<ActiveInputScheme, Arc<ResolvedScheme>>,
}

impl SchemeBook {
    /// Resolves all definitions, pushing every problem found onto `issues`
    pub fn build(
        definitions: &[DefinitionConfig],
        catalog: &InputCatalog,
        registry: &ActionRegistry,
        issues: &mut Vec<ValidationIssue>,
    ) -> Self {
        let mut book = SchemeBook::default();
        let mut seen_definitions = HashSet::new();

        for definition in definitions {
            if !seen_definitions.insert(definition.name.as_str()) {
                issues.push(ValidationIssue::DuplicateDefinition(definition.name.clone()));
                continue;
            }
            for scheme in &definition.schemes {
                let id = ActiveInputScheme::new(&definition.name, &scheme.name);
                if book.schemes.contains_key(&id) {
                    issues.push(ValidationIssue::DuplicateScheme(id));
                    continue;
                }
                let resolved = resolve_scheme(id.clone(), &scheme.maps, catalog, registry, issues);
                debug!("Scheme {} binds {} triggers", id, resolved.len());
                book.schemes.insert(id, Arc::new(resolved));
            }
        }
        book
    }

    pub fn get(&self, id: &ActiveInputScheme) -> Option<Arc<ResolvedScheme>> {
        self.schemes.get(id).cloned()
    }

    pub fn contains(&self, id: &ActiveInputScheme) -> bool {
        self.schemes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.schemes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemes.is_empty()
    }
}

fn resolve_scheme(
    id: ActiveInputScheme,
    maps: &[InputActionMap],
    catalog: &InputCatalog,
    registry: &ActionRegistry,
    issues: &mut Vec<ValidationIssue>,
) -> ResolvedScheme {
    let mut bindings = HashMap::new();

    for map in maps {
        let Some(action) = registry.get(&map.action) else {
            issues.push(ValidationIssue::UnknownAction {
                scheme: id.clone(),
                action: map.action.clone(),
            });
            continue;
        };
        if !catalog.contains(map.family, &map.input) {
            issues.push(ValidationIssue::UnknownInput {
                scheme: id.clone(),
                family: map.family,
                input: map.input.clone(),
            });
            continue;
        }
        let phases = map
            .phases
            .clone()
            .unwrap_or_else(|| action.default_phases.clone());
        if phases.is_empty() {
            issues.push(ValidationIssue::EmptyPhases {
                scheme: id.clone(),
                input: map.input.clone(),
            });
            continue;
        }

        let binding = Arc::new(ResolvedBinding {
            map: map.clone(),
            phases: phases.clone(),
            handler: Arc::clone(&action.handler),
        });
        for phase in phases {
            let key = (map.family, map.input.clone(), phase);
            if bindings.contains_key(&key) {
                issues.push(ValidationIssue::DuplicateBinding {
                    scheme: id.clone(),
                    family: map.family,
                    input: map.input.clone(),
                    phase,
                });
                continue;
            }
            bindings.insert(key, Arc::clone(&binding));
        }
    }

    ResolvedScheme { id, bindings }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{Input, InputKind};

    fn catalog() -> InputCatalog {
        let mut catalog = InputCatalog::new();
        catalog.insert(Input::new("space", DeviceFamily::Keyboard, InputKind::Digital));
        catalog.insert(Input::new("south", DeviceFamily::Gamepad, InputKind::Digital));
        catalog
    }

    fn registry() -> ActionRegistry {
        let mut registry = ActionRegistry::new();
        registry
            .register("jump", "Jump", [Phase::Start], |_| Ok(()))
            .unwrap();
        registry
            .register("charge", "Charge", [Phase::Active, Phase::End], |_| Ok(()))
            .unwrap();
        registry
    }

    fn map(input: &str, family: DeviceFamily, action: &str, phases: Option<&[Phase]>) -> InputActionMap {
        InputActionMap {
            input: InputId::from(input),
            family,
            action: action.to_string(),
            phases: phases.map(|p| p.iter().copied().collect()),
        }
    }

    fn definition(maps: Vec<InputActionMap>) -> Vec<DefinitionConfig> {
        vec![DefinitionConfig {
            name: "platformer".into(),
            schemes: vec![SchemeConfig {
                name: "default".into(),
                maps,
            }],
        }]
    }

    #[test]
    fn maps_resolve_with_default_and_explicit_phases() {
        let mut issues = Vec::new();
        let book = SchemeBook::build(
            &definition(vec![
                map("space", DeviceFamily::Keyboard, "jump", None),
                map("south", DeviceFamily::Gamepad, "charge", Some(&[Phase::End])),
            ]),
            &catalog(),
            &registry(),
            &mut issues,
        );
        assert!(issues.is_empty(), "{issues:?}");

        let scheme = book
            .get(&ActiveInputScheme::new("platformer", "default"))
            .unwrap();
        let space = InputId::from("space");
        assert!(scheme.lookup(DeviceFamily::Keyboard, &space, Phase::Start).is_some());
        assert!(scheme.lookup(DeviceFamily::Keyboard, &space, Phase::End).is_none());
        // same id on another family does not match
        assert!(scheme.lookup(DeviceFamily::Gamepad, &space, Phase::Start).is_none());
        let south = InputId::from("south");
        assert!(scheme.lookup(DeviceFamily::Gamepad, &south, Phase::Active).is_none());
        assert_eq!(
            scheme
                .lookup(DeviceFamily::Gamepad, &south, Phase::End)
                .unwrap()
                .map
                .action,
            "charge"
        );
    }

    #[test]
    fn every_problem_is_reported() {
        let mut issues = Vec::new();
        SchemeBook::build(
            &definition(vec![
                map("space", DeviceFamily::Keyboard, "fly", None),
                map("enter", DeviceFamily::Keyboard, "jump", None),
                map("space", DeviceFamily::Keyboard, "jump", Some(&[])),
                map("south", DeviceFamily::Gamepad, "jump", None),
                map("south", DeviceFamily::Gamepad, "charge", Some(&[Phase::Start])),
            ]),
            &catalog(),
            &registry(),
            &mut issues,
        );

        assert_eq!(issues.len(), 4, "{issues:?}");
        assert!(matches!(&issues[0], ValidationIssue::UnknownAction { action, .. } if action == "fly"));
        assert!(matches!(&issues[1], ValidationIssue::UnknownInput { input, .. } if input.as_str() == "enter"));
        assert!(matches!(&issues[2], ValidationIssue::EmptyPhases { .. }));
        assert!(matches!(
            &issues[3],
            ValidationIssue::DuplicateBinding { phase: Phase::Start, .. }
        ));
    }

    #[test]
    fn duplicate_schemes_are_rejected() {
        let mut defs = definition(vec![]);
        defs[0].schemes.push(SchemeConfig {
            name: "default".into(),
            maps: vec![],
        });
        let mut issues = Vec::new();
        let book = SchemeBook::build(&defs, &catalog(), &registry(), &mut issues);
        assert_eq!(book.len(), 1);
        assert!(matches!(&issues[..], [ValidationIssue::DuplicateScheme(_)]));
    }
}
