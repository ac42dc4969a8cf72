//! Plain-text tables for censuses.

use libheapcensus::Census;

const SCALES: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

/// Human-readable byte count; `signed` forces a leading sign for deltas.
pub fn readable_size(bytes: i64, signed: bool) -> String {
    let mut value = bytes as f64;
    let mut degree = 0;
    while value.abs() > 1024.0 && degree < SCALES.len() - 1 {
        value /= 1024.0;
        degree += 1;
    }
    let scale = SCALES[degree];
    if signed {
        format!("{value:+.2}{scale:>5}")
    } else {
        format!("{value:.2}{scale:>5}")
    }
}

/// Lay out one census as a bordered table, largest types first.
pub fn format_census(census: &Census) -> String {
    let diff = census.is_diff();
    let refs = census.has_references();

    let mut header = vec!["Object".to_string(), "Count".to_string(), "Size".to_string()];
    if diff {
        header[1].push_str(" Diff");
        header[2].push_str(" Diff");
    }
    if refs {
        header.push("References".to_string());
        header.push("Backwards References".to_string());
    }

    let mut rows: Vec<_> = census.rows().iter().collect();
    rows.sort_by(|a, b| b.bytes().cmp(&a.bytes()));
    let mut cells: Vec<Vec<String>> = rows
        .into_iter()
        .map(|row| {
            let count = if diff {
                format!("{:+}", row.count())
            } else {
                row.count().to_string()
            };
            let mut line = vec![
                row.type_name().to_string(),
                count,
                readable_size(row.bytes(), diff),
            ];
            if refs {
                let (forward, backward) = row.artifacts().unwrap_or(("", ""));
                line.push(forward.to_string());
                line.push(backward.to_string());
            }
            line
        })
        .collect();
    if cells.is_empty() {
        let mut line = vec![
            format!("No data to display for pid {}.", census.target_id()),
            "0".to_string(),
            readable_size(0, diff),
        ];
        line.resize(header.len(), String::new());
        cells.push(line);
    }

    let widths: Vec<usize> = (0..header.len())
        .map(|col| {
            cells
                .iter()
                .map(|line| line[col].chars().count())
                .chain([header[col].chars().count()])
                .max()
                .unwrap_or(0)
        })
        .collect();
    let border = format!(
        "+{}+",
        widths.iter().map(|w| "-".repeat(w + 2)).collect::<Vec<_>>().join("+")
    );
    let layout = |line: &[String], numeric_right: bool| {
        let inner: Vec<String> = line
            .iter()
            .zip(&widths)
            .enumerate()
            .map(|(col, (text, &width))| {
                if numeric_right && (col == 1 || col == 2) {
                    format!(" {text:>width$} ")
                } else {
                    format!(" {text:<width$} ")
                }
            })
            .collect();
        format!("|{}|", inner.join("|"))
    };

    let mut out = vec![border.clone(), layout(&header, false), border.clone()];
    out.extend(cells.iter().map(|line| layout(line, true)));
    out.push(border);
    out.join("\n")
}

pub fn print_censuses(censuses: &[Census]) {
    for census in censuses {
        println!("{}\n{}\n", census.title(), format_census(census));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libheapcensus::CensusRow;

    #[test]
    fn sizes_scale_by_1024() {
        assert_eq!(readable_size(512, false), "512.00    B");
        assert_eq!(readable_size(1_048_576, false), "1024.00   KB");
        assert_eq!(readable_size(1_048_577, false), "1.00   MB");
        assert_eq!(readable_size(-2048, true), "-2.00   KB");
        assert_eq!(readable_size(0, true), "+0.00    B");
    }

    #[test]
    fn largest_type_is_listed_first() {
        let census = Census::analysis(
            7,
            vec![CensusRow::basic("int", 100, 2800), CensusRow::basic("dict", 10, 9000)],
        );
        let table = format_census(&census);
        let dict = table.find("dict").unwrap();
        let int = table.find("int").unwrap();
        assert!(dict < int);
        assert!(table.contains("| Object "));
        assert!(!table.contains("References"));
    }

    #[test]
    fn diff_tables_are_signed() {
        let census = Census::new(
            0,
            "Snapshot Differences",
            vec![CensusRow::basic("list", -3, -300)],
        );
        let table = format_census(&census);
        assert!(table.contains("Count Diff"));
        assert!(table.contains("-3"));
        assert!(table.contains("-300.00    B"));
    }

    #[test]
    fn empty_census_says_so() {
        let table = format_census(&Census::analysis(9, Vec::new()));
        assert!(table.contains("No data to display for pid 9."));
    }

    #[test]
    fn reference_columns_follow_rows() {
        let census = Census::analysis(
            1,
            vec![
                CensusRow::WithRefs {
                    type_name: "dict".into(),
                    count: 1,
                    bytes: 232,
                    forward_artifact: "/out/dict-1-refs.txt".into(),
                    backward_artifact: "/out/dict-1-backrefs.txt".into(),
                },
                CensusRow::basic("int", 5, 140),
            ],
        );
        let table = format_census(&census);
        assert!(table.contains("Backwards References"));
        assert!(table.contains("/out/dict-1-backrefs.txt"));
    }
}
