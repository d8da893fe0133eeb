/**
 * PAGE EXTRACTION - Réponse du système legacy → MachineRecord
 *
 * La page renvoyée par le système de suivi est du HTML dont la forme n'est
 * pas garantie : on prend la première table avec un en-tête d'au moins
 * 3 colonnes et on la passe dans le même mapping positionnel que le CSV.
 * Un corps sans table mais au format `;` est traité comme un export CSV.
 */

use scraper::{ElementRef, Html, Selector};
use time::OffsetDateTime;
use tracing::warn;

use crate::csv::{build_report, parse_report, ParseReport};

const MIN_HEADER_CELLS: usize = 3;

pub fn machines_from_page(body: &str, now: OffsetDateTime) -> ParseReport {
    let document = Html::parse_document(body);
    if let Some(rows) = first_data_table(&document) {
        return build_report(rows, now);
    }

    let looks_like_csv = body
        .lines()
        .find(|line| !line.trim().is_empty())
        .is_some_and(|line| line.contains(';') && !line.trim_start().starts_with('<'));
    if looks_like_csv {
        return parse_report(body, now);
    }

    warn!(
        "[extract] no machine table in upstream page ({} bytes)",
        body.len()
    );
    ParseReport::default()
}

/// Lignes de données (en-tête retiré) de la première table exploitable
fn first_data_table(document: &Html) -> Option<Vec<Vec<String>>> {
    let (tables, rows) = match (Selector::parse("table"), Selector::parse("tr")) {
        (Ok(tables), Ok(rows)) => (tables, rows),
        (Err(e), _) | (_, Err(e)) => {
            warn!("[extract] selector rejected: {:?}", e);
            return None;
        }
    };

    document.select(&tables).find_map(|table| {
        let mut lines = table
            .select(&rows)
            .filter(|row| owning_table(*row) == Some(table))
            .map(row_cells)
            .filter(|cells| !cells.is_empty());

        let header = lines.next()?;
        if header.len() < MIN_HEADER_CELLS {
            return None;
        }
        Some(lines.collect())
    })
}

/// Table la plus proche : les lignes des tables imbriquées restent à elles
fn owning_table(row: ElementRef<'_>) -> Option<ElementRef<'_>> {
    row.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "table")
}

fn row_cells(row: ElementRef<'_>) -> Vec<String> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|el| matches!(el.value().name(), "td" | "th"))
        .map(cell_text)
        .collect()
}

/// Texte visible de la cellule, blancs (dont `&nbsp;`) réduits à un espace
fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
