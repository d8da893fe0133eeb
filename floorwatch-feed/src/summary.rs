use serde::Serialize;
use std::collections::BTreeMap;

use crate::models::MachineRecord;
use crate::status::Category;

/// Compteurs de l'en-tête du dashboard pour un snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSummary {
    pub total: usize,
    /// Toutes les catégories sont présentes, zéro compris
    pub by_category: BTreeMap<Category, usize>,
    /// Moyenne arrondie des efficacités, 0 pour un parc vide
    pub overall_efficiency: u64,
    pub unassigned: usize,
}

impl FleetSummary {
    pub fn from_machines(machines: &[MachineRecord]) -> Self {
        let mut by_category: BTreeMap<Category, usize> =
            Category::ALL.iter().map(|c| (*c, 0)).collect();
        let mut efficiency_sum: u64 = 0;
        let mut unassigned = 0;

        for machine in machines {
            *by_category.entry(machine.category()).or_insert(0) += 1;
            efficiency_sum += machine.efficiency;
            if machine.is_unassigned() {
                unassigned += 1;
            }
        }

        let overall_efficiency = if machines.is_empty() {
            0
        } else {
            (efficiency_sum as f64 / machines.len() as f64).round() as u64
        };

        Self {
            total: machines.len(),
            by_category,
            overall_efficiency,
            unassigned,
        }
    }

    pub fn count(&self, category: Category) -> usize {
        self.by_category.get(&category).copied().unwrap_or(0)
    }
}
