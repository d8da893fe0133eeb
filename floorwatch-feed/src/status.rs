/**
 * STATUS CLASSIFIER - Statuts libres du terrain → catégories fermées
 *
 * RÔLE :
 * Table unique de classification consommée par tous les écrans (cartes,
 * compteurs, légende). Les exports mélangent orthographes accentuées et non
 * accentuées du même statut, d'où la clé canonique.
 *
 * ORDRE DE RÉSOLUTION :
 * 1. clé exacte dans la table
 * 2. inclusion (mots entiers) dans un sens ou dans l'autre, clé la plus longue
 * 3. cas spéciaux : paires de mots ambigus puis radicaux
 * 4. `Unclassified`
 *
 * "Ocioso" n'est JAMAIS obtenu par inclusion : uniquement par clé exacte.
 */

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::models::MachineRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Production,
    Maintenance,
    AwaitingMaintenance,
    MissingSchedule,
    MissingOperator,
    Quality,
    Development,
    Toolroom,
    Setup,
    AwaitingSetup,
    ProfileAdjustment,
    Supply,
    MissingMaterial,
    MissingPackaging,
    Meal,
    Training,
    PowerOutage,
    ShiftRotation,
    AwaitingProcess,
    Rework,
    FiveS,
    Idle,
    NonProductive,
    Unclassified,
    Empty,
}

impl Category {
    pub const ALL: [Category; 25] = [
        Category::Production,
        Category::Maintenance,
        Category::AwaitingMaintenance,
        Category::MissingSchedule,
        Category::MissingOperator,
        Category::Quality,
        Category::Development,
        Category::Toolroom,
        Category::Setup,
        Category::AwaitingSetup,
        Category::ProfileAdjustment,
        Category::Supply,
        Category::MissingMaterial,
        Category::MissingPackaging,
        Category::Meal,
        Category::Training,
        Category::PowerOutage,
        Category::ShiftRotation,
        Category::AwaitingProcess,
        Category::Rework,
        Category::FiveS,
        Category::Idle,
        Category::NonProductive,
        Category::Unclassified,
        Category::Empty,
    ];

    /// Libellé affiché par le dashboard
    pub fn label(self) -> &'static str {
        match self {
            Category::Production => "PRODUÇÃO",
            Category::Maintenance => "MANUTENÇÃO",
            Category::AwaitingMaintenance => "AGUARDANDO MANUTENÇÃO",
            Category::MissingSchedule => "FALTA DE PROGRAMAÇÃO",
            Category::MissingOperator => "FALTA DE OPERADOR",
            Category::Quality => "QUALIDADE",
            Category::Development => "DESENVOLVIMENTO / ENGENHARIA",
            Category::Toolroom => "FERRAMENTARIA",
            Category::Setup => "SETUP",
            Category::AwaitingSetup => "AGUARDANDO SETUP",
            Category::ProfileAdjustment => "AJUSTE DE PERFIL",
            Category::Supply => "ABASTECIMENTO",
            Category::MissingMaterial => "FALTA DE MP",
            Category::MissingPackaging => "FALTA DE EMBALAGEM",
            Category::Meal => "REFEIÇÃO",
            Category::Training => "TREINAMENTO / REUNIÃO",
            Category::PowerOutage => "FALTA DE ENERGIA",
            Category::ShiftRotation => "REVEZAMENTO",
            Category::AwaitingProcess => "AGUARDANDO PROCESSO EM LINHA",
            Category::Rework => "RETRABALHO",
            Category::FiveS => "5S",
            Category::Idle => "OCIOSO",
            Category::NonProductive => "EVENTO NÃO PRODUTIVO",
            Category::Unclassified => "NÃO CLASSIFICADO",
            Category::Empty => "SEM STATUS",
        }
    }
}

/// Clés canoniques connues (déjà passées par `canonical_key`)
const TABLE: &[(&str, Category)] = &[
    ("producao", Category::Production),
    ("produca", Category::Production),
    ("em producao", Category::Production),
    ("manutencao", Category::Maintenance),
    ("mnt", Category::Maintenance),
    ("parada", Category::Maintenance),
    ("maquina parada", Category::Maintenance),
    ("manutencao corretiva", Category::Maintenance),
    ("manutencao preventiva", Category::Maintenance),
    ("aguardando manutencao", Category::AwaitingMaintenance),
    ("falta de programacao", Category::MissingSchedule),
    ("sem programacao", Category::MissingSchedule),
    ("falta de operador", Category::MissingOperator),
    ("sem operador", Category::MissingOperator),
    ("qualidade", Category::Quality),
    ("desenvolvimento engenharia", Category::Development),
    ("desenvolvimento", Category::Development),
    ("engenharia", Category::Development),
    ("ferramentaria", Category::Toolroom),
    ("setup", Category::Setup),
    ("aguardando setup", Category::AwaitingSetup),
    ("ajuste de perfil", Category::ProfileAdjustment),
    ("abastecimento", Category::Supply),
    ("abastecimento de insumo", Category::Supply),
    ("falta de mp", Category::MissingMaterial),
    ("abastecimento de mp", Category::MissingMaterial),
    ("falta de materia prima", Category::MissingMaterial),
    ("falta de embalagem", Category::MissingPackaging),
    ("falta embalagem", Category::MissingPackaging),
    ("sem embalagem", Category::MissingPackaging),
    ("embalagem", Category::MissingPackaging),
    ("refeicao", Category::Meal),
    ("almoco", Category::Meal),
    ("treinamento", Category::Training),
    ("reuniao", Category::Training),
    ("treinamentoreuniao", Category::Training),
    ("treinamento reuniao", Category::Training),
    ("falta de energia", Category::PowerOutage),
    ("revezamento", Category::ShiftRotation),
    ("revesamento", Category::ShiftRotation),
    ("aguardando processo em linha", Category::AwaitingProcess),
    ("aguardando processo", Category::AwaitingProcess),
    ("aguardando linha", Category::AwaitingProcess),
    ("retrabalho", Category::Rework),
    ("refazer trabalho", Category::Rework),
    ("retrabalhar", Category::Rework),
    ("5s", Category::FiveS),
    ("5 s", Category::FiveS),
    ("ocioso", Category::Idle),
    ("ociosa", Category::Idle),
    ("evento nao produtivo", Category::NonProductive),
    ("nao produtivo", Category::NonProductive),
];

/// Mots trop génériques pour être rattachés seuls à une clé plus longue
const AMBIGUOUS_WORDS: &[&str] = &[
    "falta", "aguardando", "sem", "de", "nao", "evento", "em", "maquina",
];

const NEGATIONS: &[&str] = &["nao", "sem"];

/// Paires de fragments qui ensemble désignent une catégorie précise
const COMPOUNDS: &[(&str, &str, Category)] = &[
    ("falta", "programa", Category::MissingSchedule),
    ("falta", "operador", Category::MissingOperator),
    ("falta", "energia", Category::PowerOutage),
    ("falta", "embalag", Category::MissingPackaging),
    ("falta", "mp", Category::MissingMaterial),
    ("abastec", "mp", Category::MissingMaterial),
    ("aguardando", "manut", Category::AwaitingMaintenance),
    ("aguardando", "setup", Category::AwaitingSetup),
    ("aguardando", "processo", Category::AwaitingProcess),
    ("ajuste", "perfil", Category::ProfileAdjustment),
];

const STEMS: &[(&str, Category)] = &[
    ("manut", Category::Maintenance),
    ("parad", Category::Maintenance),
    ("quebra", Category::Maintenance),
    ("defeito", Category::Maintenance),
    ("reparo", Category::Maintenance),
    ("qualid", Category::Quality),
    ("produ", Category::Production),
    ("setup", Category::Setup),
    ("refeic", Category::Meal),
    ("almoc", Category::Meal),
    ("treinam", Category::Training),
    ("reunia", Category::Training),
    ("revez", Category::ShiftRotation),
    ("retrab", Category::Rework),
    ("ferramenta", Category::Toolroom),
    ("desenvolv", Category::Development),
    ("engenhar", Category::Development),
    ("abastec", Category::Supply),
];

/// Clé canonique : minuscules, sans accents, `[a-z0-9 ]`, espaces simples
pub fn canonical_key(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let stripped: String = lowered
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .filter_map(|c| {
            if c.is_whitespace() {
                Some(' ')
            } else if c.is_ascii_lowercase() || c.is_ascii_digit() {
                Some(c)
            } else {
                None
            }
        })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Classification pure et totale d'un statut brut
pub fn classify(raw: &str) -> Category {
    let key = canonical_key(raw);
    if key.is_empty() {
        return Category::Empty;
    }

    if let Some((_, category)) = TABLE.iter().find(|(k, _)| *k == key) {
        return *category;
    }

    if is_negated_production(&key) {
        return Category::NonProductive;
    }

    if let Some(category) = by_containment(&key) {
        return category;
    }

    if let Some((_, _, category)) = COMPOUNDS
        .iter()
        .find(|(a, b, _)| has_fragment(&key, a) && has_fragment(&key, b))
    {
        return *category;
    }

    if let Some((_, category)) = STEMS.iter().find(|(stem, _)| key.contains(stem)) {
        return *category;
    }

    Category::Unclassified
}

// "nao produzindo", "improdutivo" : le radical "produ" dirait l'inverse
fn is_negated_production(key: &str) -> bool {
    key.contains("improdut")
        || (key.contains("produ") && NEGATIONS.iter().any(|word| contains_words(key, word)))
}

// un mot seul ne désigne jamais une clé plus longue ("linha", "s")
fn by_containment(key: &str) -> Option<Category> {
    let words: Vec<&str> = key.split(' ').collect();
    let reverse_allowed =
        words.len() >= 2 && words.iter().any(|word| !AMBIGUOUS_WORDS.contains(word));
    TABLE
        .iter()
        .filter(|(_, category)| *category != Category::Idle)
        .filter(|(k, _)| contains_words(key, k) || (reverse_allowed && contains_words(k, key)))
        .max_by_key(|(k, _)| k.len())
        .map(|(_, category)| *category)
}

// les sigles courts ("mp") doivent être des mots entiers
fn has_fragment(key: &str, fragment: &str) -> bool {
    if fragment.len() <= 2 {
        contains_words(key, fragment)
    } else {
        key.contains(fragment)
    }
}

/// `needle` apparaît dans `haystack` sur des frontières de mots
fn contains_words(haystack: &str, needle: &str) -> bool {
    format!(" {haystack} ").contains(&format!(" {needle} "))
}

/// Recensement des statuts d'un snapshot.
///
/// Le classifieur reste pur : c'est ici que les statuts inconnus sont
/// journalisés, une seule fois par clé canonique.
#[derive(Debug, Default)]
pub struct StatusCensus {
    reported: Mutex<HashSet<String>>,
}

impl StatusCensus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retourne les clés inconnues vues pour la première fois
    pub fn observe(&self, machines: &[MachineRecord]) -> Vec<String> {
        let mut fresh = Vec::new();
        let mut reported = self.reported.lock();
        for machine in machines {
            if machine.category() != Category::Unclassified {
                continue;
            }
            let key = canonical_key(&machine.status);
            if reported.insert(key.clone()) {
                tracing::warn!(
                    "[status] unclassified status \"{}\" (key \"{}\") on machine {}",
                    machine.status,
                    key,
                    machine.id
                );
                fresh.push(key);
            }
        }
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_key_strips_accents_and_punctuation() {
        assert_eq!(canonical_key("  Produção "), "producao");
        assert_eq!(canonical_key("FALTA DE PROGRAMAÇÃO!"), "falta de programacao");
        assert_eq!(canonical_key("Desenvolvimento / Engenharia"), "desenvolvimento engenharia");
        assert_eq!(canonical_key("Re-trabalho"), "retrabalho");
        assert_eq!(canonical_key("aguardando\tmanutenção"), "aguardando manutencao");
        assert_eq!(canonical_key(""), "");
    }

    #[test]
    fn accented_and_plain_spellings_agree() {
        assert_eq!(classify("Manutenção"), Category::Maintenance);
        assert_eq!(classify("manutencao"), Category::Maintenance);
        assert_eq!(classify("Refeição"), Category::Meal);
        assert_eq!(classify("ALMOÇO"), Category::Meal);
        assert_eq!(classify("Falta de Programação"), Category::MissingSchedule);
        assert_eq!(classify("Treinamento/Reunião"), Category::Training);
    }

    #[test]
    fn idle_is_exact_only() {
        assert_eq!(classify("ocioso"), Category::Idle);
        assert_eq!(classify("Ociosa"), Category::Idle);
        assert_eq!(classify("evento nao produtivo"), Category::NonProductive);
        assert_eq!(classify("Evento não produtivo"), Category::NonProductive);
        assert_ne!(classify("maquina ociosa ha 2h"), Category::Idle);
        assert_ne!(classify("ocio"), Category::Idle);
    }

    #[test]
    fn falta_alone_is_not_missing_schedule() {
        assert_eq!(classify("falta"), Category::Unclassified);
        assert_eq!(classify("falta programa semanal"), Category::MissingSchedule);
        assert_eq!(classify("Falta operador turno B"), Category::MissingOperator);
        assert_eq!(classify("falta de energia eletrica"), Category::PowerOutage);
        assert_eq!(classify("falta mp bobina"), Category::MissingMaterial);
        assert_eq!(classify("falta computador"), Category::Unclassified);
    }

    #[test]
    fn longest_key_wins_on_containment() {
        assert_eq!(classify("aguardando setup maquina 3"), Category::AwaitingSetup);
        assert_eq!(classify("abastecimento de mp linha 2"), Category::MissingMaterial);
        assert_eq!(classify("setup molde"), Category::Setup);
    }

    #[test]
    fn stems_catch_partial_words() {
        assert_eq!(classify("quebra de ferramenta"), Category::Maintenance);
        assert_eq!(classify("inspeção qualidade"), Category::Quality);
        assert_eq!(classify("produzindo"), Category::Production);
        assert_eq!(classify("ajustes no perfil"), Category::ProfileAdjustment);
    }

    #[test]
    fn negated_production_is_non_productive() {
        assert_eq!(classify("Não produzindo"), Category::NonProductive);
        assert_eq!(classify("nao produzindo"), Category::NonProductive);
        assert_eq!(classify("evento improdutivo"), Category::NonProductive);
        assert_eq!(classify("sem produção"), Category::NonProductive);
        assert_eq!(classify("produção normal"), Category::Production);
    }

    #[test]
    fn single_words_do_not_match_longer_keys() {
        assert_eq!(classify("linha"), Category::Unclassified);
        assert_eq!(classify("processo"), Category::Unclassified);
        assert_eq!(classify("s"), Category::Unclassified);
        assert_eq!(classify("mp"), Category::Unclassified);
        assert_eq!(classify("falta de"), Category::Unclassified);
        assert_eq!(classify("processo em"), Category::AwaitingProcess);
    }

    #[test]
    fn empty_and_unknown_are_distinct() {
        assert_eq!(classify(""), Category::Empty);
        assert_eq!(classify("   ?! "), Category::Empty);
        assert_eq!(classify("xyz"), Category::Unclassified);
        assert_ne!(Category::Unclassified, Category::Idle);
    }

    #[test]
    fn classification_is_idempotent_over_canonical_form() {
        let samples = [
            "Produção",
            "Falta de Operador",
            "5 S",
            "Aguardando processo em linha",
            "Evento não produtivo",
            "ocioso",
            "Re-trabalho",
            "desconhecido",
            "",
        ];
        for s in samples {
            let key = canonical_key(s);
            assert_eq!(canonical_key(&key), key, "{s}");
            assert_eq!(classify(&key), classify(s), "{s}");
        }
    }

    #[test]
    fn every_table_key_is_canonical() {
        for (key, category) in TABLE {
            assert_eq!(canonical_key(key), *key);
            assert_eq!(classify(key), *category);
        }
        assert_eq!(Category::ALL.len(), 25);
        assert_eq!(Category::FiveS.label(), "5S");
    }

    #[test]
    fn census_reports_unknown_keys_once() {
        use time::macros::datetime;
        let machine = |id: &str, status: &str| MachineRecord {
            id: id.into(),
            operator: String::new(),
            status: status.into(),
            event: String::new(),
            op: String::new(),
            operation: String::new(),
            reference: String::new(),
            planned: 0,
            produced: 0,
            rejected: 0,
            efficiency: 0,
            plan_time: 0,
            os_number: String::new(),
            expected_date: String::new(),
            expected_time: String::new(),
            timestamp: datetime!(2026-10-16 08:00:00 UTC),
        };
        let census = StatusCensus::new();
        let batch = [machine("1", "Xpto"), machine("2", "XPTO!"), machine("3", "Setup")];

        assert_eq!(census.observe(&batch), vec!["xpto".to_string()]);
        assert!(census.observe(&batch).is_empty());
    }
}
