//! Terminal output for the `job-monitor` and `job-tracker` binaries.

use crate::monitoring::OverallStatus;
use crate::tracker_store::ApplicationStatus;
use byte_unit::{Byte, UnitType};
use clap::builder::styling::{AnsiColor, Color, Style};
use clap::builder::Styles;
use crossterm::style::{Attribute, Color as CtColor, StyledContent, Stylize};
use unicode_width::UnicodeWidthStr;

const SECTION_WIDTH: usize = 60;

pub fn get_styles() -> Styles {
    let bold = |color: AnsiColor| Style::new().bold().fg_color(Some(Color::Ansi(color)));
    Styles::styled()
        .usage(bold(AnsiColor::Blue).underline())
        .header(bold(AnsiColor::Blue).underline())
        .literal(bold(AnsiColor::Green))
        .invalid(bold(AnsiColor::Red))
        .error(bold(AnsiColor::Red))
        .valid(bold(AnsiColor::Green))
        .placeholder(Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightBlack))))
}

pub mod colors {
    use crossterm::style::Color;

    pub const ACCENT: Color = Color::Rgb {
        r: 100,
        g: 149,
        b: 237,
    };
    pub const GREEN: Color = Color::Rgb {
        r: 0,
        g: 200,
        b: 120,
    };
    pub const YELLOW: Color = Color::Rgb {
        r: 240,
        g: 200,
        b: 0,
    };
    pub const ORANGE: Color = Color::Rgb {
        r: 255,
        g: 165,
        b: 0,
    };
    pub const RED: Color = Color::Rgb {
        r: 255,
        g: 85,
        b: 85,
    };
    pub const PURPLE: Color = Color::Rgb {
        r: 180,
        g: 100,
        b: 255,
    };
    pub const DIM: Color = Color::Rgb {
        r: 128,
        g: 128,
        b: 128,
    };
    pub const WHITE: Color = Color::Rgb {
        r: 255,
        g: 255,
        b: 255,
    };
}

pub mod symbols {
    pub const HORIZONTAL: &str = "─";
    pub const VERTICAL: &str = "│";
    pub const TOP_LEFT: &str = "╭";
    pub const TOP_RIGHT: &str = "╮";
    pub const BOTTOM_LEFT: &str = "╰";
    pub const BOTTOM_RIGHT: &str = "╯";
    pub const T_LEFT: &str = "├";
    pub const T_RIGHT: &str = "┤";
    pub const T_TOP: &str = "┬";
    pub const T_BOTTOM: &str = "┴";
    pub const CROSS: &str = "┼";

    pub const ARROW: &str = "▶";
    pub const BULLET: &str = "●";
    pub const BULLET_EMPTY: &str = "○";
    pub const CHECK: &str = "✓";
    pub const CROSS_MARK: &str = "✗";
    pub const WARN: &str = "⚠";
    pub const INFO: &str = "ℹ";
}

// Status lines

pub fn print_success(message: &str) {
    println!(
        " {} {}",
        symbols::CHECK.with(colors::GREEN).bold(),
        message.with(colors::GREEN)
    );
}

/// Errors go to stderr so `--json` output stays parseable.
pub fn print_error(message: &str) {
    eprintln!(
        " {} {}",
        symbols::CROSS_MARK.with(colors::RED).bold(),
        message.with(colors::RED)
    );
}

pub fn print_warning(message: &str) {
    println!(
        " {} {}",
        symbols::WARN.with(colors::ORANGE).bold(),
        message.with(colors::ORANGE)
    );
}

pub fn print_info(message: &str) {
    println!(
        " {} {}",
        symbols::INFO.with(colors::ACCENT).bold(),
        message.with(colors::ACCENT)
    );
}

// Sections

pub fn print_section_header(title: &str) {
    let title_len = title.width();
    let left = SECTION_WIDTH.saturating_sub(title_len + 4) / 2;
    let right = SECTION_WIDTH.saturating_sub(title_len + 4 + left);

    println!();
    println!(
        "{}{} {} {}{}",
        symbols::TOP_LEFT.with(colors::ACCENT),
        symbols::HORIZONTAL.repeat(left).with(colors::ACCENT),
        title.with(colors::ACCENT).bold().attribute(Attribute::Italic),
        symbols::HORIZONTAL.repeat(right).with(colors::ACCENT),
        symbols::TOP_RIGHT.with(colors::ACCENT),
    );
}

pub fn print_section_footer() {
    println!(
        "{}{}{}",
        symbols::BOTTOM_LEFT.with(colors::ACCENT),
        symbols::HORIZONTAL.repeat(SECTION_WIDTH).with(colors::ACCENT),
        symbols::BOTTOM_RIGHT.with(colors::ACCENT),
    );
}

pub fn print_key_value(key: &str, value: &str) {
    println!(
        "  {} {} {}",
        symbols::BULLET.with(colors::PURPLE),
        format!("{}:", key).with(colors::DIM),
        value.with(colors::WHITE)
    );
}

pub fn print_list_item(item: &str, indent: usize) {
    println!(
        "{}{}  {}",
        "  ".repeat(indent),
        symbols::ARROW.with(colors::ACCENT),
        item.with(colors::WHITE)
    );
}

pub fn print_empty_list(message: &str) {
    println!(
        "  {} {}",
        symbols::BULLET_EMPTY.with(colors::DIM),
        message.with(colors::DIM).attribute(Attribute::Italic)
    );
}

// Badges

pub fn check_badge(passed: bool) -> StyledContent<&'static str> {
    if passed {
        "PASS".with(colors::GREEN).bold()
    } else {
        "FAIL".with(colors::RED).bold()
    }
}

pub fn overall_badge(status: OverallStatus) -> StyledContent<String> {
    let color = match status {
        OverallStatus::Healthy => colors::GREEN,
        OverallStatus::Degraded => colors::YELLOW,
        OverallStatus::Unhealthy => colors::RED,
    };
    status.as_str().to_uppercase().with(color).bold()
}

pub fn status_color(status: ApplicationStatus) -> CtColor {
    match status {
        ApplicationStatus::NotApplied => colors::DIM,
        ApplicationStatus::Applied => colors::ACCENT,
        ApplicationStatus::Screening | ApplicationStatus::Interview => colors::PURPLE,
        ApplicationStatus::Offer => colors::GREEN,
        ApplicationStatus::Rejected => colors::RED,
        ApplicationStatus::Withdrawn => colors::ORANGE,
    }
}

/// Byte count scaled to the largest binary unit, one decimal place.
pub fn human_bytes(bytes: u64) -> String {
    let adjusted = Byte::from_u64(bytes).get_appropriate_unit(UnitType::Binary);
    format!("{:.1}", adjusted)
}

// Tables

/// Column-aligned table with rounded borders. Widths use display width, so
/// company names with wide characters stay aligned.
pub struct TableBuilder {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    widths: Vec<usize>,
}

impl TableBuilder {
    pub fn new(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
            widths: headers.iter().map(|h| h.width()).collect(),
        }
    }

    pub fn add_row(&mut self, row: Vec<String>) {
        for (width, cell) in self.widths.iter_mut().zip(&row) {
            *width = (*width).max(cell.width());
        }
        self.rows.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn border(&self, left: &str, junction: &str, right: &str) -> String {
        let inner: Vec<String> = self
            .widths
            .iter()
            .map(|w| symbols::HORIZONTAL.repeat(w + 2))
            .collect();
        format!("{}{}{}", left, inner.join(junction), right)
    }

    fn print_row(&self, cells: &[String], header: bool) {
        print!("{}", symbols::VERTICAL.with(colors::ACCENT));
        for (i, width) in self.widths.iter().enumerate() {
            let cell = cells.get(i).map(String::as_str).unwrap_or("");
            let padding = " ".repeat(width.saturating_sub(cell.width()));
            if header {
                print!(" {}{} ", cell.with(colors::ACCENT).bold(), padding);
            } else {
                print!(" {}{} ", cell.with(colors::WHITE), padding);
            }
            print!("{}", symbols::VERTICAL.with(colors::ACCENT));
        }
        println!();
    }

    pub fn print(&self) {
        println!(
            "{}",
            self.border(symbols::TOP_LEFT, symbols::T_TOP, symbols::TOP_RIGHT)
                .with(colors::ACCENT)
        );
        self.print_row(&self.headers, true);
        println!(
            "{}",
            self.border(symbols::T_LEFT, symbols::CROSS, symbols::T_RIGHT)
                .with(colors::ACCENT)
        );
        for row in &self.rows {
            self.print_row(row, false);
        }
        println!(
            "{}",
            self.border(symbols::BOTTOM_LEFT, symbols::T_BOTTOM, symbols::BOTTOM_RIGHT)
                .with(colors::ACCENT)
        );
    }
}
