use chrono::NaiveDate;
use shared::domain::{
    parse_age, parse_date, FilterField, Patch, QueryModel, QueryUpdate, DEFAULT_PAGE,
};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct QueryController {
    model: QueryModel,
}

impl QueryController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(model: QueryModel) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &QueryModel {
        &self.model
    }

    pub fn apply_partial(&mut self, update: QueryUpdate) -> &QueryModel {
        self.model.apply(update);
        &self.model
    }

    /// Always returns to the first page, even if nothing changed.
    pub fn apply_filter_change(&mut self, update: QueryUpdate) -> &QueryModel {
        self.model.apply(update);
        self.model.page = DEFAULT_PAGE;
        &self.model
    }

    pub fn apply_page_change(&mut self, page: u32, total_pages: Option<u32>) -> &QueryModel {
        let upper = match total_pages {
            Some(total) if total > 0 => total,
            _ => self.model.page.saturating_add(1),
        };
        self.model.page = page.clamp(1, upper.max(1));
        &self.model
    }

    pub fn toggle(&mut self, field: FilterField, option: &str) -> &QueryModel {
        self.model.toggle(field, option);
        self.model.page = DEFAULT_PAGE;
        &self.model
    }

    pub fn clear(&mut self, field: FilterField) -> &QueryModel {
        self.model.clear(field);
        self.model.page = DEFAULT_PAGE;
        &self.model
    }
}

pub fn coerce_age(field: &'static str, raw: &str) -> Patch<u32> {
    match parse_age(field, raw) {
        Ok(value) => value.into(),
        Err(err) => {
            debug!("controller: coercing to unset: {err}");
            Patch::Clear
        }
    }
}

pub fn coerce_date(field: &'static str, raw: &str) -> Patch<NaiveDate> {
    match parse_date(field, raw) {
        Ok(value) => value.into(),
        Err(err) => {
            debug!("controller: coercing to unset: {err}");
            Patch::Clear
        }
    }
}

pub fn coerce_text(raw: &str) -> Patch<String> {
    if raw.is_empty() {
        Patch::Clear
    } else {
        Patch::Set(raw.to_string())
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
