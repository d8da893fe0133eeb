/*!
Fixtures au format de l'export du système de suivi

Construit des fichiers CSV `;` (en-tête + 14 colonnes positionnelles) ou la
table HTML équivalente servie par le système legacy.
*/

const HEADER: [&str; 14] = [
    "MAQUINA", "OPERADOR", "STATUS", "EVENTO", "OP", "OPERACAO", "REFERENCIA",
    "PLANEJADO", "PRODUZIDO", "REFUGO", "TEMPO PLANO", "OS", "DATA PREVISTA",
    "HORA PREVISTA",
];

/// Une ligne de l'export, chaque cellule telle qu'elle apparaît dans le fichier
#[derive(Debug, Clone)]
pub struct MachineRow {
    cells: [String; 14],
}

impl MachineRow {
    pub fn new<S: Into<String>>(id: S) -> Self {
        let mut cells: [String; 14] = Default::default();
        cells[0] = id.into();
        cells[1] = "Operador".to_string();
        cells[2] = "Produção".to_string();
        cells[3] = "PRODUCAO".to_string();
        cells[4] = "100001".to_string();
        cells[5] = "1".to_string();
        cells[6] = "REF001".to_string();
        Self { cells }
    }

    fn set<S: Into<String>>(mut self, idx: usize, value: S) -> Self {
        self.cells[idx] = value.into();
        self
    }

    pub fn operator<S: Into<String>>(self, value: S) -> Self {
        self.set(1, value)
    }

    pub fn status<S: Into<String>>(self, value: S) -> Self {
        self.set(2, value)
    }

    pub fn event<S: Into<String>>(self, value: S) -> Self {
        self.set(3, value)
    }

    pub fn reference<S: Into<String>>(self, value: S) -> Self {
        self.set(6, value)
    }

    pub fn planned<S: Into<String>>(self, value: S) -> Self {
        self.set(7, value)
    }

    pub fn produced<S: Into<String>>(self, value: S) -> Self {
        self.set(8, value)
    }

    pub fn rejected<S: Into<String>>(self, value: S) -> Self {
        self.set(9, value)
    }

    pub fn plan_time<S: Into<String>>(self, value: S) -> Self {
        self.set(10, value)
    }
}

/// Builder d'export complet
#[derive(Debug, Clone, Default)]
pub struct CsvFixture {
    rows: Vec<MachineRow>,
}

impl CsvFixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row(mut self, row: MachineRow) -> Self {
        self.rows.push(row);
        self
    }

    /// Petit parc réaliste : production, setup, ocioso, sans opérateur
    pub fn sample_fleet() -> Self {
        Self::new()
            .row(
                MachineRow::new("006")
                    .operator("Luiz Antonio Acacio")
                    .planned("10000")
                    .produced("8000")
                    .rejected("50"),
            )
            .row(
                MachineRow::new("112")
                    .operator("José Carlos da Silva")
                    .status("Setup")
                    .planned("5000")
                    .produced("0"),
            )
            .row(MachineRow::new("25").operator("").status("Ocioso"))
            .row(
                MachineRow::new("130")
                    .operator("Eduardo Costa")
                    .status("Manutenção")
                    .planned("2000")
                    .produced("500"),
            )
    }

    /// Contenu CSV (en-tête compris, fin de ligne `\n`)
    pub fn build(&self) -> String {
        let mut out = HEADER.join(";");
        out.push('\n');
        for row in &self.rows {
            let line: Vec<String> = row.cells.iter().map(|c| csv_cell(c)).collect();
            out.push_str(&line.join(";"));
            out.push('\n');
        }
        out
    }

    /// Même contenu sous forme de table HTML (première ligne = en-tête)
    pub fn to_html_table(&self) -> String {
        let mut out = String::from("<table class=\"grid\">\n<tr>");
        for name in HEADER {
            out.push_str(&format!("<th>{}</th>", html_escape(name)));
        }
        out.push_str("</tr>\n");
        for row in &self.rows {
            out.push_str("<tr>");
            for cell in &row.cells {
                out.push_str(&format!("<td><span>{}</span></td>", html_escape(cell)));
            }
            out.push_str("</tr>\n");
        }
        out.push_str("</table>");
        out
    }

    /// Page complète telle que renvoyée par le système legacy
    pub fn to_html_page(&self) -> String {
        format!(
            "<!DOCTYPE html><html><head><title>Tecnicon</title></head><body>{}</body></html>",
            self.to_html_table()
        )
    }
}

fn csv_cell(value: &str) -> String {
    if value.contains(';') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
