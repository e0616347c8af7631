//! Module catalog: built-in seed modules, the static fallback list and the
//! merges that put them next to the stored catalog.

use tracing::info;
use uuid::Uuid;

use crate::gating::registry::{LocalizedList, LocalizedText, ModuleDefinition};
use crate::license::{Module, ModuleView};
use crate::store::{LicenseStore, StoreError};

const VENDOR: &str = "SIL Lab Systems";

fn module(
    name: &str,
    display_name: &str,
    description: &str,
    version: &str,
    category: &str,
    price: f64,
    features: &[&str],
) -> Module {
    Module {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        display_name: display_name.to_string(),
        description: description.to_string(),
        version: version.to_string(),
        author: VENDOR.to_string(),
        category: category.to_string(),
        price,
        features: features.iter().map(|f| f.to_string()).collect(),
        is_active: true,
    }
}

/// The modules every fresh installation is seeded with
pub fn seed_modules() -> Vec<Module> {
    vec![
        module(
            "stock-manager",
            "Stock Manager",
            "Complete inventory management system with product tracking, stock movements, \
             supplier management, and comprehensive reporting.",
            "2.1.0",
            "inventory",
            299.99,
            &[
                "Product Management",
                "Stock Tracking",
                "Supplier Management",
                "Purchase Orders",
                "Stock Reports",
                "Expiry Alerts",
                "Barcode Support",
                "Multi-location Support",
            ],
        ),
        module(
            "billing-manager",
            "Billing Manager",
            "Advanced billing and invoicing system with insurance integration, payment tracking, \
             and financial reporting.",
            "1.8.0",
            "finance",
            199.99,
            &[
                "Invoice Generation",
                "Insurance Claims",
                "Payment Tracking",
                "Financial Reports",
                "Tax Management",
                "Multi-currency Support",
                "Automated Billing",
                "Payment Reminders",
            ],
        ),
        module(
            "analytics-pro",
            "Analytics Pro",
            "Advanced analytics and business intelligence with custom dashboards, KPI tracking, \
             and predictive insights.",
            "3.0.0",
            "analytics",
            399.99,
            &[
                "Custom Dashboards",
                "KPI Tracking",
                "Predictive Analytics",
                "Data Visualization",
                "Export Reports",
                "Automated Insights",
                "Performance Metrics",
                "Trend Analysis",
            ],
        ),
        module(
            "quality-control",
            "Quality Control",
            "Comprehensive quality control system with automated QC checks, statistical analysis, \
             and compliance reporting.",
            "2.5.0",
            "quality",
            249.99,
            &[
                "QC Sample Tracking",
                "Statistical Analysis",
                "Control Charts",
                "Compliance Reports",
                "Alert System",
                "Calibration Management",
                "Audit Trail",
                "ISO 15189 Support",
            ],
        ),
        module(
            "automate-integration",
            "Automate Integration",
            "Connect and manage laboratory instruments with bidirectional communication, \
             result import, and worklist management.",
            "1.9.0",
            "integration",
            499.99,
            &[
                "Instrument Connectivity",
                "Bidirectional Communication",
                "Result Import",
                "Worklist Management",
                "Protocol Support (HL7, ASTM)",
                "Real-time Monitoring",
                "Error Handling",
                "Multi-instrument Support",
            ],
        ),
    ]
}

/// Modules shipped with the client that may not exist in storage
pub fn static_fallback_modules() -> Vec<Module> {
    vec![Module {
        id: "analytics-pro".to_string(),
        name: "analytics-pro".to_string(),
        display_name: "Analytics Pro".to_string(),
        description: "Advanced analytics and business intelligence with custom dashboards, \
                      KPI tracking, and predictive insights."
            .to_string(),
        version: "0.1.0".to_string(),
        author: "SIL Labs".to_string(),
        category: "analytics".to_string(),
        price: 0.0,
        features: vec![
            "Custom dashboards".to_string(),
            "KPI tracking".to_string(),
            "Predictive analytics".to_string(),
        ],
        is_active: true,
    }]
}

/// Insert the built-in modules that are not stored yet.
///
/// Existing rows are matched by name and left untouched, so seeding twice is
/// harmless. Returns the stored rows.
pub fn seed_catalog(store: &LicenseStore) -> Result<Vec<Module>, StoreError> {
    let before = store.list_all_modules()?.len();

    let stored = seed_modules()
        .iter()
        .map(|module| store.upsert_module(module))
        .collect::<Result<Vec<_>, _>>()?;

    let after = store.list_all_modules()?.len();
    info!(
        seeded = after.saturating_sub(before),
        total = after,
        "module catalog ready"
    );
    Ok(stored)
}

/// Append fallback modules that no stored module already covers, by name or id.
///
/// Stored entries keep their order and come first; fallback entries are never
/// installed.
pub fn merge_fallback(mut views: Vec<ModuleView>, fallback: &[Module]) -> Vec<ModuleView> {
    let extra: Vec<ModuleView> = fallback
        .iter()
        .filter(|candidate| {
            !views
                .iter()
                .any(|v| v.module.name == candidate.name || v.module.id == candidate.id)
        })
        .cloned()
        .map(|mut module| {
            if module.display_name.is_empty() {
                module.display_name = module.name.clone();
            }
            ModuleView::uninstalled(module)
        })
        .collect();

    views.extend(extra);
    views
}

/// Project a stored module into the manifest shape.
///
/// Stored modules carry a single language, so both translations get the same
/// text. Gating metadata (routes, menus, widgets) stays empty.
pub fn manifest_entry(module: &Module) -> ModuleDefinition {
    ModuleDefinition {
        id: module.name.clone(),
        name: LocalizedText::same(&module.display_name),
        description: LocalizedText::same(&module.description),
        version: module.version.clone(),
        category: module.category.clone(),
        price: Some(module.price),
        features: LocalizedList::same(&module.features),
        author: module.author.clone(),
        ..ModuleDefinition::default()
    }
}

/// Stored active modules first, then registry entries whose id is not taken
pub fn merge_manifest(stored: &[Module], registry: &[ModuleDefinition]) -> Vec<ModuleDefinition> {
    let mut merged: Vec<ModuleDefinition> = stored.iter().map(manifest_entry).collect();
    let extra: Vec<ModuleDefinition> = registry
        .iter()
        .filter(|definition| !merged.iter().any(|m| m.id == definition.id))
        .cloned()
        .collect();
    merged.extend(extra);
    merged
}
