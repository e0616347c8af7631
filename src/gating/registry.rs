// Module registry - what each module contributes to the client and who may see it

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Role wildcard accepted in permission lists
pub const ALL_ROLES: &str = "ALL";

const DEFAULT_MANIFEST: &str = include_str!("default_manifest.json");

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Failed to read manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON manifest: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid TOML manifest: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Unsupported manifest format: {0}")]
    UnsupportedFormat(String),

    #[error("Duplicate module id in manifest: {0}")]
    DuplicateId(String),
}

/// Text in both supported languages
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedText {
    #[serde(default)]
    pub fr: String,
    #[serde(default)]
    pub en: String,
}

impl LocalizedText {
    pub fn new(fr: &str, en: &str) -> Self {
        Self {
            fr: fr.to_string(),
            en: en.to_string(),
        }
    }

    /// Same text for every language
    pub fn same(text: &str) -> Self {
        Self::new(text, text)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedList {
    #[serde(default)]
    pub fr: Vec<String>,
    #[serde(default)]
    pub en: Vec<String>,
}

impl LocalizedList {
    pub fn same(items: &[String]) -> Self {
        Self {
            fr: items.to_vec(),
            en: items.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRoute {
    pub path: String,
    #[serde(default)]
    pub name: LocalizedText,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuItem {
    #[serde(default)]
    pub name: LocalizedText,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WidgetSize {
    Small,
    #[default]
    Medium,
    Large,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardWidget {
    pub id: String,
    #[serde(default)]
    pub name: LocalizedText,
    #[serde(default)]
    pub size: WidgetSize,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickAction {
    #[serde(default)]
    pub name: LocalizedText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Action key the client dispatches on
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Everything a module contributes to the client. `id` is the module name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDefinition {
    pub id: String,
    #[serde(default)]
    pub name: LocalizedText,
    #[serde(default)]
    pub description: LocalizedText,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default)]
    pub features: LocalizedList,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub routes: Vec<ModuleRoute>,
    #[serde(default)]
    pub menu_items: Vec<MenuItem>,
    #[serde(default)]
    pub dashboard_widgets: Vec<DashboardWidget>,
    #[serde(default)]
    pub quick_actions: Vec<QuickAction>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
}

impl ModuleDefinition {
    /// Module-level role check
    pub fn allows_role(&self, role: &str) -> bool {
        role_allowed(&self.permissions, role)
    }
}

/// On-disk manifest layout, also the body of `GET /api/modules/manifest`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub modules: Vec<ModuleDefinition>,
}

/// Whether a permission list admits a role
pub fn role_allowed(permissions: &[String], role: &str) -> bool {
    permissions.iter().any(|p| p == role || p == ALL_ROLES)
}

/// Ordered set of module definitions, unique by id
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    modules: Vec<ModuleDefinition>,
}

impl ModuleRegistry {
    pub fn new(modules: Vec<ModuleDefinition>) -> Result<Self, RegistryError> {
        for (idx, module) in modules.iter().enumerate() {
            if modules[..idx].iter().any(|m| m.id == module.id) {
                return Err(RegistryError::DuplicateId(module.id.clone()));
            }
        }
        Ok(Self { modules })
    }

    /// Registry bundled with the crate
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::from_json_str(DEFAULT_MANIFEST)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, RegistryError> {
        let manifest: Manifest = serde_json::from_str(raw)?;
        Self::new(manifest.modules)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, RegistryError> {
        let manifest: Manifest = toml::from_str(raw)?;
        Self::new(manifest.modules)
    }

    /// Load a manifest file, picking the parser from the extension
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let raw = fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&raw),
            Some("toml") => Self::from_toml_str(&raw),
            other => Err(RegistryError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }

    pub fn get(&self, id: &str) -> Option<&ModuleDefinition> {
        self.modules.iter().find(|m| m.id == id)
    }

    pub fn all(&self) -> &[ModuleDefinition] {
        &self.modules
    }

    pub fn by_category<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a ModuleDefinition> {
        self.modules.iter().filter(move |m| m.category == category)
    }

    /// Modules whose permission list admits the role
    pub fn visible_to<'a>(&'a self, role: &'a str) -> impl Iterator<Item = &'a ModuleDefinition> {
        self.modules.iter().filter(move |m| m.allows_role(role))
    }

    /// Role check for a module id; unknown modules are never accessible
    pub fn has_module_access(&self, id: &str, role: &str) -> bool {
        self.get(id).map_or(false, |m| m.allows_role(role))
    }

    // Declaring-module lookups, first match wins

    pub fn module_for_route(&self, path: &str) -> Option<&ModuleDefinition> {
        self.modules
            .iter()
            .find(|m| m.routes.iter().any(|r| r.path == path))
    }

    pub fn module_for_menu_path(&self, path: &str) -> Option<&ModuleDefinition> {
        self.modules
            .iter()
            .find(|m| m.menu_items.iter().any(|i| i.path == path))
    }

    pub fn module_for_widget(&self, widget_id: &str) -> Option<&ModuleDefinition> {
        self.modules
            .iter()
            .find(|m| m.dashboard_widgets.iter().any(|w| w.id == widget_id))
    }

    pub fn module_for_action(&self, action: &str) -> Option<&ModuleDefinition> {
        self.modules
            .iter()
            .find(|m| m.quick_actions.iter().any(|a| a.action == action))
    }

    /// Routes of every module the role may open
    pub fn routes_for_role(&self, role: &str) -> Vec<ModuleRoute> {
        self.visible_to(role)
            .flat_map(|m| m.routes.iter().cloned())
            .collect()
    }

    /// Menu items of visible modules, filtered again by item permissions
    pub fn menu_items_for_role(&self, role: &str) -> Vec<MenuItem> {
        self.visible_to(role)
            .flat_map(|m| m.menu_items.iter())
            .filter(|item| role_allowed(&item.permissions, role))
            .cloned()
            .collect()
    }

    pub fn dashboard_widgets_for_role(&self, role: &str) -> Vec<DashboardWidget> {
        self.visible_to(role)
            .flat_map(|m| m.dashboard_widgets.iter())
            .filter(|widget| role_allowed(&widget.permissions, role))
            .cloned()
            .collect()
    }

    pub fn quick_actions_for_role(&self, role: &str) -> Vec<QuickAction> {
        self.visible_to(role)
            .flat_map(|m| m.quick_actions.iter())
            .filter(|action| role_allowed(&action.permissions, role))
            .cloned()
            .collect()
    }
}
