/**
 * CSV PARSER - Export `;` du système de suivi de production → MachineRecord
 *
 * FORMAT :
 * - UTF-8, séparateur `;`, première ligne = en-tête (ignorée)
 * - 14 colonnes positionnelles (voir COLUMNS)
 * - Cellules entre guillemets acceptées (`"a;b"`, `""` pour un guillemet)
 * - Guillemet non refermé → ligne lue sans quoting, les suivantes intactes
 *
 * TOLÉRANCE :
 * - Cellule numérique illisible → 0, la ligne est gardée
 * - Ligne sans id → exclue (adressable par personne en aval)
 */

use std::collections::BTreeMap;
use time::OffsetDateTime;
use tracing::warn;

use crate::models::{efficiency, MachineRecord};

/// Ordre positionnel des colonnes de l'export
pub const COLUMNS: [&str; 14] = [
    "id",
    "operator",
    "status",
    "event",
    "op",
    "operation",
    "reference",
    "planned",
    "produced",
    "rejected",
    "planTime",
    "osNumber",
    "expectedDate",
    "expectedTime",
];

/// Résultat détaillé d'un parsing
#[derive(Debug, Clone, Default)]
pub struct ParseReport {
    /// Machines triées par id numérique
    pub machines: Vec<MachineRecord>,
    /// Lignes de données lues (en-tête exclu)
    pub rows_read: usize,
    pub dropped_without_id: usize,
    /// Ids déjà vus plus haut dans le fichier (la dernière ligne gagne)
    pub duplicate_ids: usize,
    pub malformed_numbers: usize,
    /// Lignes aux guillemets déséquilibrés, lues sans quoting
    pub malformed_rows: usize,
}

pub fn parse_machines(text: &str, now: OffsetDateTime) -> Vec<MachineRecord> {
    parse_report(text, now).machines
}

pub fn parse_report(text: &str, now: OffsetDateTime) -> ParseReport {
    let (rows, malformed_rows) = split_records(text);
    let mut report = build_report(rows, now);
    report.malformed_rows = malformed_rows;
    report
}

/// Transforme des lignes déjà découpées en machines (partagé avec l'extraction HTML)
pub(crate) fn build_report<I>(rows: I, now: OffsetDateTime) -> ParseReport
where
    I: IntoIterator<Item = Vec<String>>,
{
    let mut report = ParseReport::default();
    let mut by_id: BTreeMap<IdKey, MachineRecord> = BTreeMap::new();

    for cells in rows {
        report.rows_read += 1;
        let Some(record) = record_from_cells(&cells, now, &mut report.malformed_numbers) else {
            report.dropped_without_id += 1;
            continue;
        };
        if by_id.insert(IdKey::of(&record.id), record).is_some() {
            report.duplicate_ids += 1;
        }
    }

    report.machines = by_id.into_values().collect();
    report
}

/// Mapping positionnel d'une ligne, `None` si l'id est vide
pub(crate) fn record_from_cells(
    cells: &[String],
    now: OffsetDateTime,
    malformed: &mut usize,
) -> Option<MachineRecord> {
    let text = |idx: usize| cells.get(idx).map(|c| c.trim().to_string()).unwrap_or_default();
    let mut count = |idx: usize| {
        let (value, ok) = parse_count(cells.get(idx).map(String::as_str).unwrap_or(""));
        if !ok {
            *malformed += 1;
        }
        value
    };

    let id = text(0);
    if id.is_empty() {
        return None;
    }

    let planned = count(7);
    let produced = count(8);
    let rejected = count(9);
    let plan_time = count(10);

    Some(MachineRecord {
        id,
        operator: text(1),
        status: text(2),
        event: text(3),
        op: text(4),
        operation: text(5),
        reference: text(6),
        planned,
        produced,
        rejected,
        efficiency: efficiency(planned, produced),
        plan_time,
        os_number: text(11),
        expected_date: text(12),
        expected_time: text(13),
        timestamp: now,
    })
}

/// Entier positif à la manière de `parseInt` : chiffres de tête, sinon 0.
///
/// Retourne `(valeur, lisible)`; une cellule vide est lisible (absente).
fn parse_count(cell: &str) -> (u64, bool) {
    let cell = cell.trim();
    if cell.is_empty() {
        return (0, true);
    }

    let (negative, rest) = match cell.as_bytes()[0] {
        b'-' => (true, &cell[1..]),
        b'+' => (false, &cell[1..]),
        _ => (false, cell),
    };
    let digits_len = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits_len == 0 {
        return (0, false);
    }

    match rest[..digits_len].parse::<u64>() {
        Ok(0) => (0, digits_len == rest.len()),
        Ok(_) if negative => (0, false),
        Ok(value) => (value, digits_len == rest.len()),
        Err(_) => (0, false),
    }
}

/// Lignes de données (en-tête retiré) via le lecteur `csv`, lignes courtes admises.
///
/// Une ligne au nombre de guillemets impair est lue sans ses guillemets :
/// sinon le champ ouvert avalerait toutes les lignes suivantes. Retourne
/// aussi le nombre de lignes ainsi dégradées.
pub(crate) fn split_records(text: &str) -> (Vec<Vec<String>>, usize) {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut malformed = 0;
    let mut cleaned = String::with_capacity(text.len());
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        if line.matches('"').count() % 2 == 1 {
            warn!("[csv] line {}: unbalanced quote, read without quoting", line_no + 1);
            malformed += 1;
            cleaned.push_str(&line.replace('"', ""));
        } else {
            cleaned.push_str(line);
        }
        cleaned.push('\n');
    }

    let mut reader = ::csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(true)
        .flexible(true)
        .trim(::csv::Trim::All)
        .from_reader(cleaned.as_bytes());

    let mut records = Vec::new();
    for result in reader.records() {
        match result {
            Ok(record) => records.push(record.iter().map(str::to_string).collect()),
            Err(e) => {
                warn!("[csv] unreadable record skipped: {}", e);
                malformed += 1;
            }
        }
    }
    (records, malformed)
}

/// Tri : ids numériques par valeur, puis les autres par ordre lexical
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum IdKey {
    Numeric(u64, String),
    Other(String),
}

impl IdKey {
    fn of(id: &str) -> Self {
        match id.parse::<u64>() {
            Ok(n) => IdKey::Numeric(n, id.to_string()),
            Err(_) => IdKey::Other(id.to_string()),
        }
    }
}
