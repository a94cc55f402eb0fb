//! Kits: named bundles of component items, and the Kit Resolver.
//!
//! A kit is virtual. Dispensing `n` kits dispenses `required_quantity * n`
//! units of every component. Definitions are persisted as flattened component
//! rows grouped by kit name and are always replaced as a whole.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use stockroom_core::{Barcode, DomainError, DomainResult, KitShortage};

use crate::item::Item;

/// One `{componentBarcode, requiredQuantity}` entry of a kit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KitComponent {
    pub barcode: Barcode,
    /// Display name captured when the kit was saved; live item names win when resolving.
    #[serde(default)]
    pub name: String,
    pub required_quantity: u32,
}

/// Full definition of a kit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KitDefinition {
    pub name: String,
    #[serde(default)]
    pub kit_barcode: Option<Barcode>,
    /// How many complete kits exist as a bundle.
    #[serde(default)]
    pub kit_quantity: u32,
    pub components: Vec<KitComponent>,
}

/// Persisted row: one component of one kit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KitComponentRow {
    pub kit_name: String,
    pub kit_barcode: Option<Barcode>,
    pub kit_quantity: u32,
    pub position: u32,
    pub component_barcode: Barcode,
    pub component_name: String,
    pub required_quantity: u32,
}

impl KitDefinition {
    /// Structural validation, run before any store access.
    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::invalid_payload("kit name cannot be empty"));
        }
        if self.components.is_empty() {
            return Err(DomainError::invalid_payload(format!(
                "kit '{}' must list at least one component",
                self.name
            )));
        }
        let mut seen = BTreeSet::new();
        for c in &self.components {
            if c.required_quantity == 0 {
                return Err(DomainError::invalid_payload(format!(
                    "kit '{}': component {} requires a quantity of at least 1",
                    self.name, c.barcode
                )));
            }
            if !seen.insert(&c.barcode) {
                return Err(DomainError::invalid_payload(format!(
                    "kit '{}': component {} is listed twice",
                    self.name, c.barcode
                )));
            }
            if self.kit_barcode.as_ref() == Some(&c.barcode) {
                return Err(DomainError::invalid_payload(format!(
                    "kit '{}' cannot contain its own barcode",
                    self.name
                )));
            }
        }
        Ok(())
    }

    pub fn component_barcodes(&self) -> Vec<Barcode> {
        self.components.iter().map(|c| c.barcode.clone()).collect()
    }

    /// Flatten into persisted component rows.
    pub fn to_rows(&self) -> Vec<KitComponentRow> {
        self.components
            .iter()
            .enumerate()
            .map(|(idx, c)| KitComponentRow {
                kit_name: self.name.clone(),
                kit_barcode: self.kit_barcode.clone(),
                kit_quantity: self.kit_quantity,
                position: idx as u32,
                component_barcode: c.barcode.clone(),
                component_name: c.name.clone(),
                required_quantity: c.required_quantity,
            })
            .collect()
    }

    /// Regroup persisted rows (all for the same kit) into a definition.
    pub fn from_rows(mut rows: Vec<KitComponentRow>) -> Option<Self> {
        rows.sort_by_key(|r| r.position);
        let first = rows.first()?;
        let mut def = KitDefinition {
            name: first.kit_name.clone(),
            kit_barcode: first.kit_barcode.clone(),
            kit_quantity: first.kit_quantity,
            components: Vec::with_capacity(rows.len()),
        };
        for row in rows {
            def.components.push(KitComponent {
                barcode: row.component_barcode,
                name: row.component_name,
                required_quantity: row.required_quantity,
            });
        }
        Some(def)
    }

    /// Expand to per-component quantities for `num_kits`, without stock checks.
    ///
    /// Used on the return path, where missing components are skipped rather
    /// than failing the whole return.
    pub fn expand(&self, num_kits: u32) -> Vec<(Barcode, u32)> {
        self.components
            .iter()
            .map(|c| (c.barcode.clone(), c.required_quantity.saturating_mul(num_kits)))
            .collect()
    }
}

/// A component with live name and the total quantity to dispense.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedComponent {
    pub barcode: Barcode,
    pub name: String,
    pub required_quantity: u32,
    pub total_quantity: u32,
}

/// Output of the Kit Resolver: everything needed to dispense `num_kits` kits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedKit {
    pub kit_name: String,
    pub kit_barcode: Option<Barcode>,
    pub kit_quantity: u32,
    pub num_kits: u32,
    pub components: Vec<ResolvedComponent>,
}

/// Resolve a kit against live item snapshots.
///
/// Fails closed with `KitIncomplete` listing **every** component that is
/// missing or short for `num_kits`; nothing is mutated here, so callers can run
/// this before touching stock.
pub fn resolve_kit(
    definition: &KitDefinition,
    items: &HashMap<Barcode, Item>,
    num_kits: u32,
) -> DomainResult<ResolvedKit> {
    if num_kits == 0 {
        return Err(DomainError::invalid_payload("number of kits must be at least 1"));
    }

    let mut shortages = Vec::new();
    let mut components = Vec::with_capacity(definition.components.len());

    for c in &definition.components {
        let total_quantity = c.required_quantity.checked_mul(num_kits).ok_or_else(|| {
            DomainError::invalid_payload(format!("kit quantity overflow for component {}", c.barcode))
        })?;

        match items.get(&c.barcode) {
            None => shortages.push(KitShortage::MissingComponent {
                barcode: c.barcode.clone(),
            }),
            Some(item) if item.current_stock < total_quantity => {
                shortages.push(KitShortage::InsufficientComponent {
                    barcode: c.barcode.clone(),
                    name: item.name.clone(),
                    required: total_quantity,
                    available: item.current_stock,
                })
            }
            Some(item) => components.push(ResolvedComponent {
                barcode: c.barcode.clone(),
                name: item.name.clone(),
                required_quantity: c.required_quantity,
                total_quantity,
            }),
        }
    }

    if !shortages.is_empty() {
        return Err(DomainError::KitIncomplete {
            kit: definition.name.clone(),
            shortages,
        });
    }

    Ok(ResolvedKit {
        kit_name: definition.name.clone(),
        kit_barcode: definition.kit_barcode.clone(),
        kit_quantity: definition.kit_quantity,
        num_kits,
        components,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use stockroom_core::Actor;

    use super::*;
    use crate::item::NewItem;

    fn bc(s: &str) -> Barcode {
        Barcode::parse(s).unwrap()
    }

    fn item(barcode: &str, name: &str, stock: u32) -> Item {
        Item::create(
            bc(barcode),
            &NewItem {
                name: name.into(),
                total_stock: stock,
                ..NewItem::default()
            },
            &Actor::new("u1", ""),
            Utc::now(),
        )
        .unwrap()
    }

    fn camera_rig() -> KitDefinition {
        KitDefinition {
            name: "Camera Rig".into(),
            kit_barcode: Some(bc("CR-0001")),
            kit_quantity: 3,
            components: vec![
                KitComponent {
                    barcode: bc("TRI-0001"),
                    name: "Tripod".into(),
                    required_quantity: 2,
                },
                KitComponent {
                    barcode: bc("CAM-0001"),
                    name: "Camera".into(),
                    required_quantity: 1,
                },
            ],
        }
    }

    fn stock(items: Vec<Item>) -> HashMap<Barcode, Item> {
        items.into_iter().map(|i| (i.barcode.clone(), i)).collect()
    }

    #[test]
    fn resolves_and_multiplies_quantities() {
        let items = stock(vec![item("TRI-0001", "Tripod", 4), item("CAM-0001", "Camera", 2)]);
        let resolved = resolve_kit(&camera_rig(), &items, 2).unwrap();
        let totals: Vec<_> = resolved.components.iter().map(|c| c.total_quantity).collect();
        assert_eq!(totals, vec![4, 2]);
        assert_eq!(resolved.num_kits, 2);
    }

    #[test]
    fn lists_every_shortage() {
        let items = stock(vec![item("TRI-0001", "Tripod", 1)]);
        let err = resolve_kit(&camera_rig(), &items, 1).unwrap_err();
        match err {
            DomainError::KitIncomplete { kit, shortages } => {
                assert_eq!(kit, "Camera Rig");
                assert_eq!(shortages.len(), 2);
                assert_eq!(
                    shortages[0],
                    KitShortage::InsufficientComponent {
                        barcode: bc("TRI-0001"),
                        name: "Tripod".into(),
                        required: 2,
                        available: 1,
                    }
                );
                assert_eq!(shortages[1], KitShortage::MissingComponent { barcode: bc("CAM-0001") });
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn zero_kits_is_invalid() {
        let err = resolve_kit(&camera_rig(), &HashMap::new(), 0).unwrap_err();
        assert!(matches!(err, DomainError::InvalidPayload(_)));
    }

    #[test]
    fn rows_regroup_in_position_order() {
        let def = camera_rig();
        let mut rows = def.to_rows();
        rows.reverse();
        assert_eq!(KitDefinition::from_rows(rows), Some(def));
        assert_eq!(KitDefinition::from_rows(vec![]), None);
    }

    #[test]
    fn validate_rejects_duplicates_and_zero_quantities() {
        let mut def = camera_rig();
        def.components[1].barcode = bc("TRI-0001");
        assert!(def.validate().is_err());

        let mut def = camera_rig();
        def.components[0].required_quantity = 0;
        assert!(def.validate().is_err());

        let mut def = camera_rig();
        def.components.clear();
        assert!(def.validate().is_err());

        assert!(camera_rig().validate().is_ok());
    }

    #[test]
    fn expand_skips_stock_checks() {
        assert_eq!(
            camera_rig().expand(3),
            vec![(bc("TRI-0001"), 6), (bc("CAM-0001"), 3)]
        );
    }
}
