use std::ops::Range;

use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span},
    widgets::{Block, Cell, Clear, Paragraph, Row, Table, Wrap},
};

use crate::context::Phase;
use crate::domain::TableConfig;
use crate::form::{FormInput, RecordForm};
use crate::menu::{MenuItem, RecordMore};
use crate::filter::FilterDropdown;
use crate::model::{Model, Modus};

pub const STATUSLINE_HEIGHT: usize = 1;
pub const TABLE_HEADER_HEIGHT: usize = 1;
pub const TABLE_BORDER_HEIGHT: usize = 2;
const SELECTION_MARKER_WIDTH: u16 = 3;

#[derive(Debug)]
pub struct TableUI {
    max_column_width: usize,
}

impl TableUI {
    pub fn new(cfg: &TableConfig) -> Self {
        Self {
            max_column_width: cfg.max_column_width,
        }
    }

    pub fn draw(&self, model: &Model, frame: &mut Frame) {
        let [table_area, status_area] = Layout::vertical([
            Constraint::Min(1),
            Constraint::Length(STATUSLINE_HEIGHT as u16),
        ])
        .areas(frame.area());

        self.draw_table(model, frame, table_area);
        Self::draw_statusline(model, frame, status_area);

        match model.modus() {
            Modus::TABLE => {}
            Modus::POPUP => {
                if let Some(message) = model.popup_message() {
                    Self::draw_help(message, frame);
                }
            }
            Modus::FORM => {
                if let Some(form) = model.form() {
                    Self::draw_form(form, frame);
                }
            }
            Modus::MENU => {
                if let Some(menu) = model.menu() {
                    Self::draw_menu(menu, frame);
                }
            }
            Modus::FILTER => {
                if let Some(dropdown) = model.dropdown() {
                    Self::draw_filter(dropdown, frame);
                }
            }
        }
    }

    fn column_widths(&self, model: &Model) -> Vec<Constraint> {
        let rows = model.visible_rows();
        let mut widths = vec![Constraint::Length(SELECTION_MARKER_WIDTH)];
        for (idx, column) in model.columns().iter().enumerate() {
            let content = rows
                .iter()
                .map(|r| r.cell_text(idx).chars().count())
                .max()
                .unwrap_or(0);
            let width = content.max(column.title.chars().count() + 1).min(self.max_column_width);
            widths.push(Constraint::Length(width as u16));
        }
        widths
    }

    fn draw_table(&self, model: &Model, frame: &mut Frame, area: Rect) {
        let columns = model.columns();
        let filters = model.filters();
        let header = Row::new(
            std::iter::once(Cell::from("")).chain(columns.iter().enumerate().map(|(idx, c)| {
                let mut title = c.title.clone();
                if c.required {
                    title.push('*');
                }
                if filters.is_active(&c.title) {
                    title.push_str(" ▾");
                }
                let style = if idx == model.curser_column() {
                    Style::new().bold().underlined()
                } else {
                    Style::new().bold()
                };
                Cell::from(title).style(style)
            })),
        );

        let height = model.layout().table_height;
        let rows = model
            .visible_rows()
            .into_iter()
            .enumerate()
            .skip(model.offset_row())
            .take(height)
            .map(|(pos, row)| {
                let is_curser = pos == model.curser_row();
                let marker = if model.is_selected(row.index) { "[*]" } else { "[ ]" };
                let cells = std::iter::once(Cell::from(marker)).chain((0..columns.len()).map(|idx| {
                    let cell = Cell::from(row.cell_text(idx));
                    if is_curser && idx == model.curser_column() {
                        cell.style(Style::new().add_modifier(Modifier::BOLD))
                    } else {
                        cell
                    }
                }));
                let table_row = Row::new(cells);
                if is_curser {
                    table_row.style(Style::new().add_modifier(Modifier::REVERSED))
                } else {
                    table_row
                }
            });

        let title = Line::from(format!(" {} ", model.context().storage_key()).bold());
        let table = Table::new(rows, self.column_widths(model))
            .header(header)
            .block(Block::bordered().title(title.centered()));
        frame.render_widget(table, area);
    }

    fn draw_statusline(model: &Model, frame: &mut Frame, area: Rect) {
        let context = model.context();
        let state = match (context.phase(), context.error()) {
            (Phase::Uninitialized | Phase::Loading, _) => Span::from("loading").yellow(),
            (Phase::Ready, Some(e)) => Span::from(format!("error: {e}")).red(),
            (Phase::Ready, None) if context.is_saving() => Span::from("saving ...").yellow(),
            (Phase::Ready, None) => Span::from("saved").green(),
            (Phase::Unmounted, _) => Span::from("closed").dark_gray(),
        };
        let mut spans = vec![
            Span::from(format!(
                " {}/{} records",
                model.visible_rows().len(),
                context.len()
            )),
            " | ".into(),
            state,
        ];
        let selected = model.selected_records().len();
        if selected > 0 {
            spans.push(format!(" | {selected} selected").into());
        }
        if !model.filters().is_empty() {
            spans.push(format!(" | {} filters", model.filters().len()).into());
        }
        spans.push(" | ".into());
        spans.push(Span::from(model.status_message().to_string()).italic());
        spans.push(" | ? help ".blue());
        frame.render_widget(Paragraph::new(Line::from(spans)), area);
    }

    fn draw_help(message: &str, frame: &mut Frame) {
        let area = centered_rect(frame.area(), 60, message.lines().count() as u16 + 2);
        frame.render_widget(Clear, area);
        frame.render_widget(
            Paragraph::new(message)
                .wrap(Wrap { trim: false })
                .block(Block::bordered().title(" Help ")),
            area,
        );
    }

    fn draw_form(form: &RecordForm, frame: &mut Frame) {
        let label_width = form
            .fields()
            .iter()
            .map(|f| f.descriptor.label.chars().count() + 1)
            .max()
            .unwrap_or(0);

        let mut lines = Vec::new();
        let mut curser = None;
        for (idx, field) in form.fields().iter().enumerate() {
            let focused = idx == form.focus();
            let mut label = field.descriptor.label.clone();
            if field.descriptor.required {
                label.push('*');
            }
            let label = format!("{label:<label_width$} ");
            let style = if focused {
                Style::new().add_modifier(Modifier::REVERSED)
            } else {
                Style::new()
            };
            if focused && let FormInput::Text(inputter) = &field.input {
                curser = Some((label.chars().count() + inputter.curser(), lines.len()));
            }
            lines.push(Line::from(vec![
                Span::from(label).bold(),
                Span::styled(field.input.display(), style),
            ]));
            if let Some(error) = &field.error {
                lines.push(Line::from(
                    Span::from(format!("{:width$} {error}", "", width = label_width)).red(),
                ));
            }
        }
        lines.push(Line::from(""));
        lines.push(Line::from(
            " Tab next | Space toggle | ←/→ choose | Enter save | Esc cancel ".blue(),
        ));

        let area = centered_rect(frame.area(), 70, lines.len() as u16 + 2);
        frame.render_widget(Clear, area);
        frame.render_widget(
            Paragraph::new(lines).block(Block::bordered().title(format!(" {} ", form.title()))),
            area,
        );
        if let Some((x, y)) = curser {
            frame.set_cursor_position((
                (area.x + 1 + x as u16).min(area.right().saturating_sub(2)),
                area.y + 1 + y as u16,
            ));
        }
    }

    fn draw_menu(menu: &RecordMore, frame: &mut Frame) {
        let lines: Vec<Line> = MenuItem::ALL
            .iter()
            .enumerate()
            .map(|(idx, item)| {
                let line = Line::from(format!(" {} ", item.label()));
                if idx == menu.cursor() {
                    line.reversed()
                } else {
                    line
                }
            })
            .collect();
        let area = centered_rect(frame.area(), 24, lines.len() as u16 + 2);
        frame.render_widget(Clear, area);
        frame.render_widget(
            Paragraph::new(lines)
                .block(Block::bordered().title(format!(" Record {} ", menu.record_index() + 1))),
            area,
        );
    }

    fn draw_filter(dropdown: &FilterDropdown, frame: &mut Frame) {
        let options = dropdown.options();
        let max_lines = frame.area().height.saturating_sub(2) as usize;
        let window = visible_window(options.len(), dropdown.cursor(), max_lines);
        let height = u16::try_from(window.len()).unwrap_or(u16::MAX).saturating_add(2);
        let lines: Vec<Line> = options[window.clone()]
            .iter()
            .zip(window)
            .map(|(option, idx)| {
                let mark = if dropdown.is_selected(option) { "[x]" } else { "[ ]" };
                let text = if option.is_empty() { "(empty)" } else { option.as_str() };
                let line = Line::from(format!(" {mark} {text} "));
                if idx == dropdown.cursor() {
                    line.style(Style::new().bg(Color::DarkGray))
                } else {
                    line
                }
            })
            .collect();
        let area = centered_rect(frame.area(), 40, height);
        frame.render_widget(Clear, area);
        frame.render_widget(
            Paragraph::new(lines).block(
                Block::bordered()
                    .title(format!(" Filter {} ", dropdown.title()))
                    .title_bottom(format!(" {}/{} ", dropdown.cursor() + 1, options.len())),
            ),
            area,
        );
    }
}

/// The slice of `len` items of at most `height` lines that keeps `cursor`
/// in view.
fn visible_window(len: usize, cursor: usize, height: usize) -> Range<usize> {
    let height = height.max(1).min(len);
    let start = cursor
        .saturating_sub(height.saturating_sub(1))
        .min(len - height);
    start..start + height
}

/// A `width` x `height` rect centered in `area`, shrunk to fit.
fn centered_rect(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}
