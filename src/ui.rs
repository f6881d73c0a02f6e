//! Terminal rendering of the star map.
//!
//! Reads a snapshot of the simulation state once per frame; all layout
//! decisions live here, none in the core.

use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::canvas::{Canvas, Circle, Line as MapLine, Points};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Sparkline};
use ratatui::Frame;

use crate::capture::CaptureStatus;
use crate::graph::{Node, NodeKey};
use crate::model::Protocol;
use crate::sim::{SimLoop, CENTER};
use crate::stats::format_bytes;

/// Simulation-space viewport mapped onto the canvas widget.
const VIEW_X: f64 = 400.0;
const VIEW_Y: f64 = 300.0;

fn proto_color(p: Protocol) -> Color {
    match p {
        Protocol::Tcp => Color::Cyan,
        Protocol::Udp => Color::Yellow,
        Protocol::Icmp => Color::Magenta,
        Protocol::Other => Color::DarkGray,
    }
}

pub fn draw(
    f: &mut Frame,
    sim: &SimLoop,
    health: &CaptureStatus,
    rows: &[(NodeKey, String)],
    list_state: &mut ListState,
    debug: bool,
) {
    let outer = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)])
        .split(f.size());

    draw_header(f, sim, health, debug, outer[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(30), Constraint::Percentage(70)])
        .split(outer[1]);

    let side = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(8)])
        .split(body[0]);

    draw_sidebar(f, sim, rows, list_state, side[0]);
    let selected = list_state.selected().and_then(|i| rows.get(i)).and_then(|(key, _)| sim.graph.get(key));
    draw_details(f, selected, side[1]);
    draw_map(f, sim, body[1]);
}

fn draw_details(f: &mut Frame, node: Option<&Node>, area: ratatui::layout::Rect) {
    let block = Block::default().title(" Details ").borders(Borders::ALL);
    let Some(node) = node else {
        f.render_widget(Paragraph::new("no star selected").block(block), area);
        return;
    };

    let ports = node
        .last_ports
        .map(|(from, to)| format!("{} -> {}", from, to))
        .unwrap_or_else(|| "n/a".to_string());
    let country = node.country.as_deref().unwrap_or("--");
    let mut lines = vec![
        Line::from(format!("addr:  {} [{}]", node.ip, country)),
        Line::from(format!("ports: {}  proto: {}", ports, node.top_protocol().label())),
        Line::from(format!(
            "dn {}  up {}  pkts {}",
            format_bytes(node.bytes_in),
            format_bytes(node.bytes_out),
            node.packets
        )),
        Line::from(format!("hosts: {}  activity: {:.2}", node.unique_hosts(), node.activity.max(0.0))),
    ];
    if node.frozen {
        lines.push(Line::from(Span::styled("FROZEN", Style::default().fg(Color::Cyan))));
    }
    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn draw_header(
    f: &mut Frame,
    sim: &SimLoop,
    health: &CaptureStatus,
    debug: bool,
    area: ratatui::layout::Rect,
) {
    let block = Block::default().title(" netstar ").borders(Borders::ALL);

    if let CaptureStatus::Failed(msg) = health {
        let warning = Paragraph::new(Line::from(Span::styled(
            format!("capture failed: {msg} (running without live data, q quits)"),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )))
        .block(block);
        f.render_widget(warning, area);
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(20), Constraint::Length(32)])
        .split(area);

    let stats = &sim.stats;
    let mut text = format!(
        "dn {}/s  up {}/s | total dn {} up {} | pkts {} | stars {}",
        format_bytes(stats.down_speed()),
        format_bytes(stats.up_speed()),
        format_bytes(stats.total_down()),
        format_bytes(stats.total_up()),
        stats.packets(),
        sim.graph.len(),
    );
    if sim.paused {
        text.push_str(" | PAUSED");
    }
    if debug {
        let protos = sim.stats.proto_counts();
        text.push_str(&format!(
            " | q {}/{} drop {} ev/tick {} | tcp {} udp {} icmp {} other {}",
            sim.queue_len(),
            sim.queue_capacity(),
            sim.dropped(),
            sim.events_last_tick(),
            protos[Protocol::Tcp.index()],
            protos[Protocol::Udp.index()],
            protos[Protocol::Icmp.index()],
            protos[Protocol::Other.index()],
        ));
    }

    let header = Paragraph::new(text).block(block);
    f.render_widget(header, chunks[0]);

    let history = sim.stats.down_history();
    let spark = Sparkline::default()
        .block(Block::default().borders(Borders::ALL))
        .data(&history)
        .style(Style::default().fg(Color::Cyan));
    f.render_widget(spark, chunks[1]);
}

fn draw_sidebar(
    f: &mut Frame,
    sim: &SimLoop,
    rows: &[(NodeKey, String)],
    list_state: &mut ListState,
    area: ratatui::layout::Rect,
) {
    let items: Vec<ListItem> = rows
        .iter()
        .map(|(key, label)| {
            let node = sim.graph.get(key);
            let frozen = node.map(|n| n.frozen).unwrap_or(false);
            let bytes = node.map(|n| n.total_bytes).unwrap_or(0);
            let text = format!(
                "{}{}  {}",
                if frozen { "* " } else { "" },
                label,
                format_bytes(bytes)
            );
            let color = node.map(|n| proto_color(n.top_protocol())).unwrap_or(Color::Gray);
            ListItem::new(text).style(Style::default().fg(color))
        })
        .collect();

    let sidebar = List::new(items)
        .block(Block::default().title(" Stars ").borders(Borders::ALL))
        .highlight_style(Style::default().add_modifier(Modifier::BOLD).fg(Color::Yellow))
        .highlight_symbol(">> ");
    f.render_stateful_widget(sidebar, area, list_state);
}

fn draw_map(f: &mut Frame, sim: &SimLoop, area: ratatui::layout::Rect) {
    let core_radius = sim.graph.core_radius();
    let map = Canvas::default()
        .block(Block::default().title(" Star Map ").borders(Borders::ALL))
        .x_bounds([-VIEW_X, VIEW_X])
        .y_bounds([-VIEW_Y, VIEW_Y])
        .paint(move |ctx| {
            // Connection lines first so everything else draws on top.
            for (_, node) in sim.graph.iter() {
                if node.activity < 0.05 {
                    continue;
                }
                let color = if node.activity > 0.5 {
                    proto_color(node.last_proto)
                } else {
                    Color::DarkGray
                };
                ctx.draw(&MapLine {
                    x1: CENTER.0,
                    y1: CENTER.1,
                    x2: node.x,
                    y2: node.y,
                    color,
                });
            }

            for (_, node) in sim.graph.iter() {
                draw_particles(ctx, node);
            }

            ctx.draw(&Circle {
                x: CENTER.0,
                y: CENTER.1,
                radius: core_radius,
                color: Color::Cyan,
            });
            ctx.draw(&Points { coords: &[CENTER], color: Color::White });

            for (_, node) in sim.graph.iter() {
                if node.activity < 0.05 && !node.frozen {
                    continue;
                }
                let color = proto_color(node.last_proto);
                ctx.draw(&Points { coords: &[(node.x, node.y)], color });
                if node.frozen {
                    ctx.draw(&Circle { x: node.x, y: node.y, radius: 6.0, color: Color::Cyan });
                }
                if node.activity > 0.5 || node.frozen {
                    ctx.print(
                        node.x + 8.0,
                        node.y,
                        Line::from(Span::styled(node.label(), Style::default().fg(color))),
                    );
                }
            }
        });
    f.render_widget(map, area);
}

fn draw_particles(ctx: &mut ratatui::widgets::canvas::Context<'_>, node: &Node) {
    for p in &node.particles {
        let (start, end) = if p.inbound {
            ((node.x, node.y), CENTER)
        } else {
            (CENTER, (node.x, node.y))
        };
        let x = start.0 + (end.0 - start.0) * p.progress;
        let y = start.1 + (end.1 - start.1) * p.progress;
        ctx.draw(&Points { coords: &[(x, y)], color: proto_color(p.proto) });
    }
}
