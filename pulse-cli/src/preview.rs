//! Terminal plot of the expected output.

use std::io::{self, IsTerminal, Write};

use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{self, Event, KeyEventKind};
use crossterm::style::Print;
use crossterm::terminal::{self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{execute, queue};
use pulse_core::controller::PreviewRenderer;
use pulse_core::waveform::WaveformPreview;

pub const TITLE: &str = "Expected Output";

/// Columns taken by the voltage labels on the left.
const GUTTER: usize = 11;
const PLOT_HEIGHT: usize = 8;
const FALLBACK_WIDTH: usize = 72;
/// Samples inspected per column; longer buckets are strided.
const MAX_PROBES: u64 = 256;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Column {
    High,
    Low,
    /// Level changes inside or at the start of the column.
    Edge,
}

fn columns(preview: &WaveformPreview, width: usize) -> Vec<Column> {
    let len = u128::from(preview.len());
    let levels = preview.levels();
    let threshold = f64::midpoint(levels.on_volts, levels.off_volts);
    let high_at = |index: u128| {
        u64::try_from(index)
            .ok()
            .and_then(|index| preview.sample(index))
            .is_some_and(|sample| sample.level_volts >= threshold)
    };

    let width_wide = width as u128;
    let mut previous = None;
    let mut out = Vec::with_capacity(width);
    for column in 0..width_wide {
        let start = len * column / width_wide;
        let end = (len * (column + 1) / width_wide).max(start + 1).min(len);
        let step = ((end - start) / u128::from(MAX_PROBES)).max(1);

        let (mut seen_high, mut seen_low, mut last) = (false, false, None);
        let mut index = start;
        while index < end {
            let high = high_at(index);
            seen_high |= high;
            seen_low |= !high;
            last = Some(high);
            index += step;
        }

        let kind = match (seen_high, seen_low) {
            (true, true) => Column::Edge,
            (true, false) if previous == Some(false) => Column::Edge,
            (false, true) if previous == Some(true) => Column::Edge,
            (true, false) => Column::High,
            _ => Column::Low,
        };
        previous = last.or(previous);
        out.push(kind);
    }
    out
}

/// Draws `preview` as `height` text rows of `width` columns, on level first.
#[must_use]
pub fn rasterize(preview: &WaveformPreview, width: usize, height: usize) -> Vec<String> {
    let height = height.max(2);
    let mut grid = vec![vec![' '; width]; height];
    if preview.is_empty() {
        return grid.into_iter().map(|row| row.into_iter().collect()).collect();
    }

    for (x, column) in columns(preview, width).into_iter().enumerate() {
        match column {
            Column::High => grid[0][x] = '─',
            Column::Low => grid[height - 1][x] = '─',
            Column::Edge => grid.iter_mut().for_each(|row| row[x] = '│'),
        }
    }
    grid.into_iter().map(|row| row.into_iter().collect()).collect()
}

fn plot_lines(preview: &WaveformPreview, width: usize) -> Vec<String> {
    let levels = preview.levels();
    let plot_width = width.saturating_sub(GUTTER).max(8);
    let rows = rasterize(preview, plot_width, PLOT_HEIGHT);

    let mut lines = Vec::with_capacity(rows.len() + 3);
    lines.push(format!("{TITLE:^width$}"));
    for (index, row) in rows.iter().enumerate() {
        let label = if index == 0 {
            format!("{:>7.2} V ", levels.on_volts)
        } else if index == rows.len() - 1 {
            format!("{:>7.2} V ", levels.off_volts)
        } else {
            " ".repeat(GUTTER - 1)
        };
        lines.push(format!("{label}┤{row}"));
    }

    let end = format!("{:.6} s", preview.duration_seconds());
    let gap = plot_width.saturating_sub(end.len() + 3);
    lines.push(format!("{}0 s{}{end}", " ".repeat(GUTTER), " ".repeat(gap)));
    lines
}

/// Restores the terminal when the preview screen goes away.
struct ScreenGuard;

impl ScreenGuard {
    fn enter() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        if let Err(error) = execute!(io::stdout(), EnterAlternateScreen, Hide) {
            let _ = terminal::disable_raw_mode();
            return Err(error);
        }
        Ok(Self)
    }
}

impl Drop for ScreenGuard {
    fn drop(&mut self) {
        let _ = execute!(io::stdout(), Show, LeaveAlternateScreen);
        let _ = terminal::disable_raw_mode();
    }
}

/// Full-screen plot that waits for a key before the run starts.
///
/// When stdout is not a terminal the plot is printed once and the run
/// continues without waiting.
#[derive(Debug, Default)]
pub struct TerminalPreview;

impl TerminalPreview {
    fn print_plain(preview: &WaveformPreview) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        for line in plot_lines(preview, FALLBACK_WIDTH + GUTTER) {
            writeln!(stdout, "{line}")?;
        }
        stdout.flush()
    }

    fn show(preview: &WaveformPreview) -> io::Result<()> {
        let (columns, _) = terminal::size()?;
        let lines = plot_lines(preview, usize::from(columns));

        let _guard = ScreenGuard::enter()?;
        let mut stdout = io::stdout();
        queue!(stdout, Clear(ClearType::All))?;
        let mut row = 0_u16;
        for line in &lines {
            queue!(stdout, MoveTo(0, row), Print(line))?;
            row = row.saturating_add(1);
        }
        queue!(
            stdout,
            MoveTo(0, row.saturating_add(1)),
            Print("press any key to start the run")
        )?;
        stdout.flush()?;

        loop {
            if matches!(event::read()?, Event::Key(key) if key.kind == KeyEventKind::Press) {
                return Ok(());
            }
        }
    }
}

impl PreviewRenderer for TerminalPreview {
    type Error = io::Error;

    fn render(&mut self, preview: &WaveformPreview) -> Result<(), Self::Error> {
        if io::stdout().is_terminal() && io::stdin().is_terminal() {
            Self::show(preview)
        } else {
            Self::print_plain(preview)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pulse_core::timing::solve;
    use pulse_core::waveform::{OutputLevels, predict, predict_hold};

    use super::*;

    #[test]
    fn two_pulses_at_half_duty() {
        let clock = solve(80_000_000, 8, 10_000, 50.0).expect("representable");
        let preview = predict(&clock, 2, 100, OutputLevels::default());

        let rows = rasterize(&preview, 8, 3);

        assert_eq!(rows, vec!["──│ │─│ ", "  │ │ │ ", "  │─│ │─"]);
    }

    #[test]
    fn hold_is_a_flat_top_line() {
        let preview = predict_hold(Duration::from_secs(1), 100, OutputLevels::default());

        let rows = rasterize(&preview, 10, 2);

        assert_eq!(rows[0], "─".repeat(10));
        assert_eq!(rows[1], " ".repeat(10));
    }

    #[test]
    fn dense_trains_collapse_to_edges() {
        let clock = solve(80_000_000, 8, 10_000, 25.0).expect("representable");
        let preview = predict(&clock, 1_000, 100, OutputLevels::default());

        let rows = rasterize(&preview, 20, 2);

        assert!(rows.iter().all(|row| row.chars().all(|c| c == '│')));
    }

    #[test]
    fn plot_is_labelled_with_levels_and_duration() {
        let clock = solve(80_000_000, 8, 10_000, 10.0).expect("representable");
        let preview = predict(&clock, 7, 100, OutputLevels::default());

        let lines = plot_lines(&preview, 60);

        assert_eq!(lines[0].trim(), TITLE);
        assert!(lines[1].starts_with("   5.00 V ┤"));
        assert!(lines[PLOT_HEIGHT].starts_with("   0.00 V ┤"));
        assert!(lines[PLOT_HEIGHT + 1].ends_with("0.000700 s"));
    }
}
