//! Board rendering command: `stageboard board`.

use anyhow::Result;
use stageboard::pipeline::BoardView;

use super::Project;

pub async fn cmd_board(project: &Project, pipeline: &str, show_cards: bool) -> Result<()> {
    let engine = project.engine(pipeline).await?;
    let view = engine.board().view();
    print_board(&view, show_cards);
    Ok(())
}

fn print_board(view: &BoardView, show_cards: bool) {
    println!();
    println!(
        "{}",
        console::style(format!("Pipeline: {}", view.pipeline)).bold().cyan()
    );
    if let Some(banner) = &view.banner {
        println!("{} {}", console::style("!").yellow().bold(), banner);
    }
    println!();
    println!("  {:<24} {:>6} {:>14}", "STAGE", "COUNT", "VALUE");

    for column in &view.columns {
        let title = if column.droppable {
            console::style(column.title.clone()).bold()
        } else {
            console::style(column.title.clone()).dim()
        };
        println!(
            "  {:<24} {:>6} {:>14.2}",
            title, column.count, column.aggregate_value
        );
        if show_cards {
            for card in &column.cards {
                let marker = if card.orphan {
                    format!(" (was '{}')", card.recorded_stage.as_deref().unwrap_or(""))
                } else {
                    String::new()
                };
                println!(
                    "      - {}{} {}",
                    card.entity_id,
                    console::style(marker).dim(),
                    console::style(format!("{:.2}", card.value)).dim()
                );
            }
        }
    }

    println!();
    println!("  {:<24} {:>6} {:>14.2}", "TOTAL", "", view.total_value);
    println!();
}
