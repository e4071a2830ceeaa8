// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Board tables printed by `efiver` and `smcver`.

use std::io::Write;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TableStyle {
    /// `board-id | model | BIOS ID`.
    Efi,
    /// `board-id | model | SMC version`.
    Smc,
}

impl TableStyle {
    fn width(&self) -> usize {
        match self {
            Self::Efi => 75,
            Self::Smc => 59,
        }
    }

    fn separator(&self) -> String {
        "-".repeat(self.width())
    }

    /// Format a row. Rows describing this machine are marked with `>` `<`.
    pub fn format_row(&self, board_id: &str, model: &str, value: &str, host: bool) -> String {
        let (start, end) = if host { ("> ", " <") } else { ("  ", "") };

        match self {
            Self::Efi => format!(
                "{}{:>20} | {:>14} | {}{}",
                start, board_id, model, value, end
            ),
            Self::Smc => format!(
                "{}{:>20} | {:>16} |  v{:<11}{}",
                start, board_id, model, value, end
            ),
        }
    }

    pub fn format_warning(&self, installed: &str) -> String {
        match self {
            Self::Efi => format!(
                "> WARNING: Your EFI ROM {:>21} is not up-to-date!! <",
                installed
            ),
            Self::Smc => format!(
                "> WARNING: Your SMC version ({:>8}) is not up-to-date! <",
                installed
            ),
        }
    }
}

/// Writes a board table, framing the row of this machine.
pub struct BoardTable<W: Write> {
    out: W,
    style: TableStyle,
    host_board: Option<String>,
    /// Whether the last line written was a separator.
    separated: bool,
    host_rows: usize,
}

impl<W: Write> BoardTable<W> {
    pub fn new(
        mut out: W,
        style: TableStyle,
        title: &str,
        host_board: Option<String>,
    ) -> std::io::Result<Self> {
        writeln!(out, "{}", style.separator())?;
        writeln!(out, "{:^width$}", title, width = style.width())?;
        writeln!(out, "{}", style.separator())?;

        Ok(Self {
            out,
            style,
            host_board,
            separated: true,
            host_rows: 0,
        })
    }

    /// Write a row. Returns whether it describes this machine.
    pub fn row(&mut self, board_id: &str, model: &str, value: &str) -> std::io::Result<bool> {
        let host = self.host_board.as_deref() == Some(board_id);

        if host {
            if !self.separated {
                writeln!(self.out, "{}", self.style.separator())?;
            }
            writeln!(
                self.out,
                "{}",
                self.style.format_row(board_id, model, value, true)
            )?;
            writeln!(self.out, "{}", self.style.separator())?;
            self.separated = true;
            self.host_rows += 1;
        } else {
            writeln!(
                self.out,
                "{}",
                self.style.format_row(board_id, model, value, false)
            )?;
            self.separated = false;
        }

        Ok(host)
    }

    /// Number of rows written that describe this machine.
    pub fn host_rows(&self) -> usize {
        self.host_rows
    }

    /// Close the table, optionally warning that `outdated` firmware is installed.
    pub fn finish(mut self, outdated: Option<&str>) -> std::io::Result<W> {
        if !self.separated {
            writeln!(self.out, "{}", self.style.separator())?;
        }

        if let Some(installed) = outdated {
            writeln!(self.out, "{}", self.style.format_warning(installed))?;
            writeln!(self.out, "{}", self.style.separator())?;
        }

        Ok(self.out)
    }
}
