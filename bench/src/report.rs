use cli_table::{format::Justify, Cell, CellStruct, Style, Table, TableStruct};

use crate::timing::TimingRecord;

fn seconds(s: f64) -> CellStruct {
    format!("{s:.6}").cell().justify(Justify::Right)
}

/// One row per record, in the order the records were taken.
///
/// User and system CPU columns are shown only when every record has them.
pub fn table(records: &[TimingRecord]) -> TableStruct {
    let with_cpu = records.iter().all(|r| r.cpu.is_some());
    let rows = records
        .iter()
        .map(|r| match (with_cpu, r.user_seconds(), r.sys_seconds()) {
            (true, Some(user), Some(sys)) => vec![
                r.label.as_str().cell(),
                seconds(user),
                seconds(sys),
                seconds(r.real_seconds()),
            ],
            _ => vec![r.label.as_str().cell(), seconds(r.real_seconds())],
        })
        .collect::<Vec<_>>();
    let title = if with_cpu {
        vec!["", "user", "system", "real"]
    } else {
        vec!["", "real"]
    };
    rows.table().title(title.into_iter().map(|t| t.cell().bold(true)))
}

pub fn render(records: &[TimingRecord]) -> anyhow::Result<String> {
    Ok(table(records).display()?.to_string())
}

pub fn stdout(records: &[TimingRecord]) -> anyhow::Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    cli_table::print_stdout(table(records))?;
    Ok(())
}
