use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Case-insensitive substring match on station name or location.
/// An empty term matches everything.
pub fn matches_search(station_name: &str, station_location: &str, term: &str) -> bool {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return true;
    }
    station_name.to_lowercase().contains(&term) || station_location.to_lowercase().contains(&term)
}

/// Sort by price; items without a price always go last
pub fn sort_by_price<T, F>(items: &mut [T], order: SortOrder, price: F)
where
    F: Fn(&T) -> Option<f64>,
{
    items.sort_by(|a, b| match (price(a), price(b)) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => match order {
            SortOrder::Asc => x.total_cmp(&y),
            SortOrder::Desc => y.total_cmp(&x),
        },
    });
}

/// Item with the lowest present price, first one on ties
pub fn cheapest<T, F>(items: &[T], price: F) -> Option<&T>
where
    F: Fn(&T) -> Option<f64>,
{
    items
        .iter()
        .filter_map(|item| price(item).map(|p| (p, item)))
        .fold(None, |best: Option<(f64, &T)>, (p, item)| match best {
            Some((b, _)) if b <= p => best,
            _ => Some((p, item)),
        })
        .map(|(_, item)| item)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
    pub total_pages: usize,
}

/// 1-based pagination. Page 0 is read as page 1; pages past the end are empty.
pub fn paginate<T>(items: Vec<T>, page: usize, page_size: usize) -> Page<T> {
    let page = page.max(1);
    let page_size = if page_size == 0 { DEFAULT_PAGE_SIZE } else { page_size };
    let total = items.len();
    let total_pages = total.div_ceil(page_size);
    let items = items
        .into_iter()
        .skip((page - 1).saturating_mul(page_size))
        .take(page_size)
        .collect();

    Page {
        items,
        page,
        page_size,
        total,
        total_pages,
    }
}
