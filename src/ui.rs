use crate::app::{App, Focus};
use crate::chat::ChatRole;
use crate::models::MarketQuote;
use crate::store::{DashboardState, HealthStatus, MarketView, RunState, SimulationView};
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{
        Axis, Bar, BarChart, BarGroup, Block, Borders, Cell, Chart, Dataset, Gauge, GraphType,
        Paragraph, Row, Table, Wrap,
    },
};

pub fn render(f: &mut Frame, app: &App, state: &DashboardState) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(f.area());

    render_header(f, app, state, layout[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(62), Constraint::Percentage(38)])
        .split(layout[1]);

    render_simulation(f, &state.simulation, body[0]);

    let side = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(50),
            Constraint::Length(3),
            Constraint::Min(6),
        ])
        .split(body[1]);

    render_market(f, &state.market, app.market_refreshing(), side[0]);
    render_health(f, &state.health, side[1]);
    render_chat(f, app, side[2]);

    render_footer(f, app, layout[2]);
}

fn change_color(delta: f64) -> Color {
    if delta >= 0.0 { Color::Green } else { Color::Red }
}

fn render_header(f: &mut Frame, app: &App, state: &DashboardState, area: Rect) {
    let sim = &state.simulation;
    let run_color = match sim.run_state {
        RunState::Running => Color::Green,
        RunState::Stopped => Color::Yellow,
    };

    let mut spans = vec![
        Span::styled(" AEGRIS ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::raw(" | "),
        Span::styled(sim.run_state.as_str(), Style::default().fg(run_color)),
    ];

    if let Some(snapshot) = &sim.snapshot {
        let ret = sim.total_return_pct();
        spans.push(Span::raw(" | "));
        spans.push(Span::raw(format!("Step {}", snapshot.step)));
        spans.push(Span::raw(" | "));
        spans.push(Span::styled(
            format!("${:.2}", snapshot.portfolio_value),
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ));
        spans.push(Span::raw(" "));
        spans.push(Span::styled(format!("({:+.2}%)", ret), Style::default().fg(change_color(ret))));

        let pnl = sim.history.last_change();
        spans.push(Span::raw(" | P&L "));
        spans.push(Span::styled(format!("{:+.2}", pnl), Style::default().fg(change_color(pnl))));
    }

    if let Some(msg) = app.status_msg.as_ref().or(sim.last_error.as_ref()) {
        spans.push(Span::raw(" | "));
        spans.push(Span::styled(msg.clone(), Style::default().fg(Color::Red)));
    }

    let header = Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL));
    f.render_widget(header, area);
}

fn render_simulation(f: &mut Frame, sim: &SimulationView, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(60),
            Constraint::Length(3),
            Constraint::Min(5),
        ])
        .split(area);

    render_value_chart(f, sim, chunks[0]);

    let gauges = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(33),
            Constraint::Percentage(33),
            Constraint::Percentage(34),
        ])
        .split(chunks[1]);

    let (drawdown, volatility, turnover) = sim
        .snapshot
        .as_ref()
        .map(|s| (s.drawdown, s.volatility, s.turnover))
        .unwrap_or((0.0, 0.0, 0.0));
    render_ratio_gauge(f, " Drawdown ", drawdown, Color::Red, gauges[0]);
    render_ratio_gauge(f, " Volatility ", volatility, Color::Yellow, gauges[1]);
    render_ratio_gauge(f, " Turnover ", turnover, Color::Cyan, gauges[2]);

    render_allocations(f, sim, chunks[2]);
}

fn render_value_chart(f: &mut Frame, sim: &SimulationView, area: Rect) {
    let mut points = sim.history.value_points();
    let mut title = "Portfolio Value";
    // Fall back to the server's record when nothing has been stepped locally.
    if points.len() <= 1 && !sim.server_history.is_empty() {
        points = sim
            .server_history
            .iter()
            .map(|s| (s.step as f64, s.portfolio_value))
            .collect();
        title = "Portfolio Value (server history)";
    }

    if points.is_empty() {
        let empty = Paragraph::new("No simulation data yet. Press 's' to start.")
            .alignment(Alignment::Center)
            .block(Block::default().title(title).borders(Borders::ALL));
        f.render_widget(empty, area);
        return;
    }

    let x_min = points.first().map(|p| p.0).unwrap_or(0.0);
    let x_max = points.last().map(|p| p.0).unwrap_or(1.0).max(x_min + 1.0);
    let min_value = points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let max_value = points.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
    let pad = ((max_value - min_value) * 0.05).max(1.0);

    let datasets = vec![
        Dataset::default()
            .name("Value")
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::Cyan))
            .data(&points),
    ];

    let chart = Chart::new(datasets)
        .block(
            Block::default()
                .title(Span::styled(
                    title,
                    Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                ))
                .borders(Borders::ALL),
        )
        .x_axis(
            Axis::default()
                .title("Step")
                .style(Style::default().fg(Color::Gray))
                .bounds([x_min, x_max])
                .labels(vec![
                    Span::raw(format!("{:.0}", x_min)),
                    Span::raw(format!("{:.0}", x_max)),
                ]),
        )
        .y_axis(
            Axis::default()
                .title("$")
                .style(Style::default().fg(Color::Gray))
                .bounds([min_value - pad, max_value + pad])
                .labels(vec![
                    Span::styled(format!("{:.0}", min_value), Style::default().fg(Color::Gray)),
                    Span::styled(format!("{:.0}", max_value), Style::default().fg(Color::Gray)),
                ]),
        );

    f.render_widget(chart, area);
}

fn render_ratio_gauge(f: &mut Frame, title: &str, value: f64, color: Color, area: Rect) {
    // Gauge panics outside [0, 1].
    let ratio = if value.is_finite() { value.abs().clamp(0.0, 1.0) } else { 0.0 };
    let gauge = Gauge::default()
        .block(Block::default().title(title.to_string()).borders(Borders::ALL))
        .gauge_style(Style::default().fg(color))
        .ratio(ratio)
        .label(format!("{:.2}%", value * 100.0));
    f.render_widget(gauge, area);
}

fn render_allocations(f: &mut Frame, sim: &SimulationView, area: Rect) {
    let allocations = sim
        .snapshot
        .as_ref()
        .map(|s| s.allocations())
        .unwrap_or_else(|| vec![("Cash".to_string(), 100.0)]);

    let bars: Vec<Bar> = allocations
        .iter()
        .map(|(name, pct)| {
            Bar::default()
                .value(pct.round().max(0.0) as u64)
                .text_value(format!("{:.0}%", pct))
                .label(Line::from(name.clone()))
        })
        .collect();

    let chart = BarChart::default()
        .block(Block::default().title(" Allocation ").borders(Borders::ALL))
        .data(BarGroup::default().bars(&bars))
        .bar_width(6)
        .bar_gap(1)
        .max(100)
        .bar_style(Style::default().fg(Color::Cyan))
        .value_style(Style::default().fg(Color::Black).bg(Color::Cyan));
    f.render_widget(chart, area);
}

fn quote_row(quote: &MarketQuote) -> Row<'static> {
    let color = change_color(quote.change);
    Row::new(vec![
        Cell::from(quote.symbol.clone()),
        Cell::from(format!("{:.2}", quote.price)),
        Cell::from(Span::styled(
            format!("{:+.2}%", quote.change_percent),
            Style::default().fg(color),
        )),
    ])
}

fn section_row(title: &'static str) -> Row<'static> {
    Row::new(vec![Cell::from(Span::styled(
        title,
        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
    ))])
}

fn render_market(f: &mut Frame, market: &MarketView, refreshing: bool, area: Rect) {
    let mut title = String::from(" Market ");
    if refreshing {
        title.push_str("(refreshing) ");
    } else if market.is_stale() {
        title.push_str("(stale) ");
    }
    if let Some(updated) = market.last_updated {
        title.push_str(&format!("@ {} ", updated.format("%H:%M:%S")));
    }
    let block = Block::default().title(title).borders(Borders::ALL);

    let Some(summary) = &market.summary else {
        let text = match &market.last_error {
            Some(err) => vec![
                Line::from(Span::styled(err.clone(), Style::default().fg(Color::Red))),
                Line::from("Press 'r' to retry."),
            ],
            None => vec![Line::from("Loading market data...")],
        };
        let placeholder = Paragraph::new(text)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true })
            .block(block);
        f.render_widget(placeholder, area);
        return;
    };

    let mut rows = Vec::new();
    if let Some(sp) = &summary.sp500 {
        rows.push(section_row("S&P 500"));
        rows.push(quote_row(sp));
    }
    let sections: [(&'static str, &[MarketQuote], usize); 4] = [
        ("Indices", &summary.indices, 4),
        ("Watchlist", &summary.watchlist, 4),
        ("Gainers", &summary.gainers, 3),
        ("Losers", &summary.losers, 3),
    ];
    for (name, quotes, limit) in sections {
        if quotes.is_empty() {
            continue;
        }
        rows.push(section_row(name));
        rows.extend(quotes.iter().take(limit).map(quote_row));
    }

    let table = Table::new(
        rows,
        [
            Constraint::Percentage(40),
            Constraint::Percentage(30),
            Constraint::Percentage(30),
        ],
    )
    .block(block);
    f.render_widget(table, area);
}

fn render_health(f: &mut Frame, health: &HealthStatus, area: Rect) {
    let line = match health {
        HealthStatus::Unknown => Line::from(Span::styled("Checking backend...", Style::default().fg(Color::Gray))),
        HealthStatus::Online(h) => Line::from(vec![
            Span::styled("ONLINE ", Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)),
            Span::raw(format!(
                "model {} | server {}",
                if h.model_loaded { "loaded" } else { "missing" },
                if h.running { "running" } else { "idle" }
            )),
        ]),
        HealthStatus::Unreachable(err) => Line::from(vec![
            Span::styled("UNREACHABLE ", Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)),
            Span::raw(format!("{} ('h' to retry)", err)),
        ]),
    };
    let widget = Paragraph::new(line).block(Block::default().title(" Backend ").borders(Borders::ALL));
    f.render_widget(widget, area);
}

fn render_chat(f: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(3)])
        .split(area);

    let mut lines: Vec<Line> = Vec::new();
    for message in app.chat.messages() {
        let (who, color) = match message.role {
            ChatRole::User => ("you", Color::Yellow),
            ChatRole::Assistant => ("bot", Color::Cyan),
        };
        lines.push(Line::from(vec![
            Span::styled(format!("{}: ", who), Style::default().fg(color).add_modifier(Modifier::BOLD)),
            Span::raw(message.text.clone()),
        ]));
        if !message.sources.is_empty() {
            lines.push(Line::from(Span::styled(
                format!("  sources: {}", message.sources.join(", ")),
                Style::default().fg(Color::DarkGray),
            )));
        }
    }
    if app.chat.is_pending() {
        lines.push(Line::from(Span::styled("bot: ...", Style::default().fg(Color::Gray))));
    }

    let visible = chunks[0].height.saturating_sub(2) as usize;
    let skip = lines.len().saturating_sub(visible);
    let log = Paragraph::new(lines.into_iter().skip(skip).collect::<Vec<_>>())
        .wrap(Wrap { trim: false })
        .block(Block::default().title(" Assistant ").borders(Borders::ALL));
    f.render_widget(log, chunks[0]);

    let input_style = if app.focus == Focus::Chat {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    let input_title = if app.chat.is_pending() { " Waiting for reply " } else { " Message " };
    let input = Paragraph::new(app.input.as_str())
        .style(input_style)
        .block(Block::default().borders(Borders::ALL).title(input_title));
    f.render_widget(input, chunks[1]);
}

fn render_footer(f: &mut Frame, app: &App, area: Rect) {
    let hint = match app.focus {
        Focus::Dashboard => "s: start | x: stop | r: refresh market | h: health | c/Tab: chat | q/Esc: quit",
        Focus::Chat => "Enter: send | Esc/Tab: back",
    };

    let footer = Paragraph::new(Line::from(vec![
        Span::styled(" Controls: ", Style::default().fg(Color::Gray)),
        Span::styled(hint, Style::default().fg(Color::White)),
    ]))
    .block(Block::default().borders(Borders::ALL));

    f.render_widget(footer, area);
}
