//! Extraction of team rows from the rendered standings page.

use common::{Dataset, TeamRecord};
use tracing::debug;

use crate::html;

const LIST_CLASS: &str = "TableBody_list";
const ITEM_CLASS: &str = "TableBody_item";
const CELL_CLASS: &str = "TableBody_cell";
const TEAM_NAME_CLASS: &str = "TeamInfo_team_name";
const RANKING_CLASS: &str = "TeamInfo_ranking";
const EMBLEM_CLASS: &str = "TeamInfo_emblem";
const BLIND_CLASS: &str = "blind";

/// Rank suffix on the Korean page ("1위").
const RANK_SUFFIX: char = '위';

/// Rows with fewer cells are layout rows (headers, ads) and are skipped.
const MIN_CELLS: usize = 6;

/// True once the client-side render has produced the standings list.
pub fn is_page_ready(page: &str) -> bool {
    html::find_by_class(page, "ol", LIST_CLASS, 0).is_some()
}

/// Parse every complete team row. Returns an empty dataset when the
/// standings list is missing.
pub fn parse_standings(page: &str) -> Dataset {
    let Some(list) = html::find_by_class(page, "ol", LIST_CLASS, 0) else {
        debug!("Standings list not found in page ({} bytes)", page.len());
        return Dataset::empty();
    };
    let list = &page[list];

    let mut skipped = 0usize;
    let teams: Dataset = html::find_all_by_class(list, "li", ITEM_CLASS)
        .into_iter()
        .filter_map(|item| {
            let row = parse_row(&list[item]);
            if row.is_none() {
                skipped += 1;
            }
            row
        })
        .collect();

    debug!("Parsed {} team rows ({} skipped)", teams.len(), skipped);
    teams
}

fn parse_row(item: &str) -> Option<TeamRecord> {
    let cells: Vec<&str> = html::find_all_by_class(item, "div", CELL_CLASS)
        .into_iter()
        .map(|span| &item[span])
        .collect();
    if cells.len() < MIN_CELLS {
        return None;
    }

    let info = cells[0];
    let team_name = class_text(info, "div", TEAM_NAME_CLASS)
        .or_else(|| class_text(info, "span", TEAM_NAME_CLASS))
        .unwrap_or_default();
    let rank = class_text(info, "div", RANKING_CLASS)
        .or_else(|| class_text(info, "span", RANKING_CLASS))
        .unwrap_or_default()
        .trim_end_matches(RANK_SUFFIX)
        .trim()
        .to_string();

    Some(TeamRecord {
        rank,
        team_name,
        logo: emblem_src(info).unwrap_or_default(),
        gb: stat(cells[2]),
        wins: stat(cells[3]),
        draws: stat(cells[4]),
        losses: stat(cells[5]),
    })
}

fn class_text(block: &str, tag: &str, class: &str) -> Option<String> {
    html::find_by_class(block, tag, class, 0).map(|span| html::text(&block[span]))
}

fn emblem_src(info: &str) -> Option<String> {
    let emblem = html::find_by_class(info, "div", EMBLEM_CLASS, 0)
        .or_else(|| html::find_by_class(info, "span", EMBLEM_CLASS, 0))?;
    let emblem = &info[emblem];
    let img = emblem.find("<img")?;
    html::attr(html::open_tag(&emblem[img..]), "src")
}

/// Stat cells carry a screen-reader label (`<span class="blind">승</span>`)
/// ahead of the value; the value is whatever follows the label.
fn stat(cell: &str) -> String {
    let inner = html::inner(cell);
    match html::find_by_class(inner, "span", BLIND_CLASS, 0) {
        Some(label) => html::text(&inner[label.end..]),
        None => html::text(inner),
    }
}
