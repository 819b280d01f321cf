// Parser for the minfin.com.ua bank USD rates listing
//
// The page renders a table with id `smTable`. Every body row holds a fixed
// sequence of cells marked with a `data-title` attribute; the position of a
// cell in that sequence decides which field it carries.

use anyhow::{anyhow, Result};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};

use crate::model::{parse_rate, parse_update_time, BankRate};

/// Default page scraped by a run
pub const BANKS_USD_URL: &str = "https://minfin.com.ua/ua/currency/banks/usd/";

const ROW_SELECTOR: &str = "#smTable tbody tr";
const CELL_SELECTOR: &str = "[data-title]";

/// Positions of the `data-title` cells within a row
mod column {
    pub const BANK: usize = 0;
    pub const BUY: usize = 1;
    pub const SELL: usize = 2;
    pub const BUY_ONLINE: usize = 3;
    pub const SELL_ONLINE: usize = 4;
    pub const UPDATE_AT: usize = 5;
    pub const SITE_URL: usize = 6;
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("invalid selector {:?}: {}", css, e))
}

/// Parse every bank row of the rates table, in document order.
///
/// A page without the table yields an empty list. Rows without a bank name
/// are skipped; any other missing or malformed cell only blanks its field.
pub fn parse_bank_rates(html: &str, source_url: &str) -> Result<Vec<BankRate>> {
    let document = Html::parse_document(html);
    let row_sel = selector(ROW_SELECTOR)?;
    let cell_sel = selector(CELL_SELECTOR)?;

    let mut rates = Vec::new();
    for (idx, row) in document.select(&row_sel).enumerate() {
        let cells: Vec<ElementRef> = row.select(&cell_sel).collect();
        match parse_row(&cells, source_url) {
            Some(rate) => {
                debug!(
                    "Row {}: {} buy={:?} sell={:?}",
                    idx, rate.bank, rate.buy, rate.sell
                );
                rates.push(rate);
            }
            None => warn!("Row {} has no bank name ({} cells), skipping", idx, cells.len()),
        }
    }

    if rates.is_empty() {
        warn!("No bank rows found on {}", source_url);
    } else {
        info!("Parsed {} bank rate(s) from {}", rates.len(), source_url);
    }

    Ok(rates)
}

fn parse_row(cells: &[ElementRef], source_url: &str) -> Option<BankRate> {
    let bank = cell_text(cells, column::BANK)?;
    if bank.is_empty() {
        return None;
    }

    let rate_at = |idx: usize| cell_text(cells, idx).and_then(|t| parse_rate(&t));

    Some(BankRate {
        bank,
        buy: rate_at(column::BUY),
        sell: rate_at(column::SELL),
        buy_online: rate_at(column::BUY_ONLINE),
        sell_online: rate_at(column::SELL_ONLINE),
        site_url: cells.get(column::SITE_URL).and_then(|cell| first_anchor_href(*cell)),
        update_at: cell_text(cells, column::UPDATE_AT).and_then(|t| parse_update_time(&t)),
        source_url: source_url.to_string(),
    })
}

fn cell_text(cells: &[ElementRef], idx: usize) -> Option<String> {
    cells
        .get(idx)
        .map(|cell| cell.text().collect::<String>().trim().to_string())
}

/// `href` of the first `<a>` that is a direct child of the cell
fn first_anchor_href(cell: ElementRef) -> Option<String> {
    cell.children()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "a")
        .and_then(|a| a.value().attr("href"))
        .map(|href| href.trim().to_string())
        .filter(|href| !href.is_empty())
}
