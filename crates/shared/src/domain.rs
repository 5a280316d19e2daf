use std::{fmt, str::FromStr};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_PAGE_SIZE: u32 = 10;

macro_rules! wire_enum {
    ($name:ident, $field:literal, { $($variant:ident => $wire:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $wire,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                match raw {
                    $($wire => Ok(Self::$variant),)+
                    _ => Err(ValidationError::UnknownVariant {
                        field: $field,
                        raw: raw.to_string(),
                    }),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    Date,
    Quantity,
    CustomerName,
}

wire_enum!(SortBy, "sort_by", {
    Date => "date",
    Quantity => "quantity",
    CustomerName => "customer_name",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

wire_enum!(SortOrder, "order", {
    Asc => "asc",
    Desc => "desc",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterField {
    Region,
    Gender,
    ProductCategory,
    Tag,
    PaymentMethod,
}

wire_enum!(FilterField, "filter", {
    Region => "region",
    Gender => "gender",
    ProductCategory => "product_category",
    Tag => "tag",
    PaymentMethod => "payment_method",
});

impl FilterField {
    pub const ALL: [FilterField; 5] = [
        FilterField::Region,
        FilterField::Gender,
        FilterField::ProductCategory,
        FilterField::Tag,
        FilterField::PaymentMethod,
    ];
}

/// Keeps entry order but compares as a set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct OptionSet {
    values: Vec<String>,
}

impl OptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: impl Into<String>) -> bool {
        let value = value.into();
        if value.is_empty() || self.contains(&value) {
            return false;
        }
        self.values.push(value);
        true
    }

    pub fn remove(&mut self, value: &str) -> bool {
        let before = self.values.len();
        self.values.retain(|v| v != value);
        self.values.len() != before
    }

    /// Adds the value if absent, removes it if present. Returns whether the
    /// value is a member afterwards.
    pub fn toggle(&mut self, value: &str) -> bool {
        if self.remove(value) {
            return false;
        }
        self.insert(value)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn contains(&self, value: &str) -> bool {
        self.values.iter().any(|v| v == value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn sorted(&self) -> Vec<&str> {
        let mut sorted: Vec<&str> = self.iter().collect();
        sorted.sort_unstable();
        sorted
    }
}

impl PartialEq for OptionSet {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|v| other.contains(v))
    }
}

impl Eq for OptionSet {}

impl<S: Into<String>> FromIterator<S> for OptionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = OptionSet::new();
        for value in iter {
            set.insert(value);
        }
        set
    }
}

impl From<Vec<String>> for OptionSet {
    fn from(values: Vec<String>) -> Self {
        values.into_iter().collect()
    }
}

impl From<OptionSet> for Vec<String> {
    fn from(set: OptionSet) -> Self {
        set.values
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryModel {
    pub customer_name: Option<String>,
    pub phone: Option<String>,
    pub region: Option<OptionSet>,
    pub gender: Option<OptionSet>,
    pub product_category: Option<OptionSet>,
    pub tag: Option<OptionSet>,
    pub payment_method: Option<OptionSet>,
    pub age_min: Option<u32>,
    pub age_max: Option<u32>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
    pub page: u32,
    pub page_size: u32,
}

impl Default for QueryModel {
    fn default() -> Self {
        Self {
            customer_name: None,
            phone: None,
            region: None,
            gender: None,
            product_category: None,
            tag: None,
            payment_method: None,
            age_min: None,
            age_max: None,
            date_from: None,
            date_to: None,
            sort_by: SortBy::default(),
            sort_order: SortOrder::default(),
            page: DEFAULT_PAGE,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl QueryModel {
    pub fn filter(&self, field: FilterField) -> Option<&OptionSet> {
        match field {
            FilterField::Region => self.region.as_ref(),
            FilterField::Gender => self.gender.as_ref(),
            FilterField::ProductCategory => self.product_category.as_ref(),
            FilterField::Tag => self.tag.as_ref(),
            FilterField::PaymentMethod => self.payment_method.as_ref(),
        }
    }

    fn filter_slot_mut(&mut self, field: FilterField) -> &mut Option<OptionSet> {
        match field {
            FilterField::Region => &mut self.region,
            FilterField::Gender => &mut self.gender,
            FilterField::ProductCategory => &mut self.product_category,
            FilterField::Tag => &mut self.tag,
            FilterField::PaymentMethod => &mut self.payment_method,
        }
    }

    /// Flips membership of `option`; an emptied set unsets the field.
    pub fn toggle(&mut self, field: FilterField, option: &str) {
        let slot = self.filter_slot_mut(field);
        let mut set = slot.take().unwrap_or_default();
        set.toggle(option);
        *slot = (!set.is_empty()).then_some(set);
    }

    pub fn clear(&mut self, field: FilterField) {
        *self.filter_slot_mut(field) = None;
    }

    /// `Patch::Clear` on a defaulted field restores its default.
    pub fn apply(&mut self, update: QueryUpdate) {
        update.customer_name.apply_to(&mut self.customer_name);
        update.phone.apply_to(&mut self.phone);
        update.region.apply_to(&mut self.region);
        update.gender.apply_to(&mut self.gender);
        update.product_category.apply_to(&mut self.product_category);
        update.tag.apply_to(&mut self.tag);
        update.payment_method.apply_to(&mut self.payment_method);
        update.age_min.apply_to(&mut self.age_min);
        update.age_max.apply_to(&mut self.age_max);
        update.date_from.apply_to(&mut self.date_from);
        update.date_to.apply_to(&mut self.date_to);
        update.sort_by.apply_or_default(&mut self.sort_by, SortBy::default());
        update
            .sort_order
            .apply_or_default(&mut self.sort_order, SortOrder::default());
        update.page.apply_or_default(&mut self.page, DEFAULT_PAGE);
        update
            .page_size
            .apply_or_default(&mut self.page_size, DEFAULT_PAGE_SIZE);
        self.canonicalize();
    }

    fn canonicalize(&mut self) {
        for text in [&mut self.customer_name, &mut self.phone] {
            if text.as_deref().is_some_and(str::is_empty) {
                *text = None;
            }
        }
        for field in FilterField::ALL {
            let slot = self.filter_slot_mut(field);
            if slot.as_ref().is_some_and(OptionSet::is_empty) {
                *slot = None;
            }
        }
        self.page = self.page.max(1);
        if self.page_size == 0 {
            self.page_size = DEFAULT_PAGE_SIZE;
        }
    }

    pub fn active_filter_count(&self) -> usize {
        let text = [&self.customer_name, &self.phone]
            .into_iter()
            .filter(|v| v.as_deref().is_some_and(|s| !s.is_empty()))
            .count();
        let sets = FilterField::ALL
            .into_iter()
            .filter(|field| self.filter(*field).is_some_and(|set| !set.is_empty()))
            .count();
        let ages = [self.age_min, self.age_max].iter().flatten().count();
        let dates = [self.date_from, self.date_to].iter().flatten().count();
        text + sets + ages + dates
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Patch<T> {
    #[default]
    Keep,
    Clear,
    Set(T),
}

impl<T> Patch<T> {
    pub fn is_keep(&self) -> bool {
        matches!(self, Patch::Keep)
    }

    pub fn apply_to(self, slot: &mut Option<T>) {
        match self {
            Patch::Keep => {}
            Patch::Clear => *slot = None,
            Patch::Set(value) => *slot = Some(value),
        }
    }

    fn apply_or_default(self, slot: &mut T, default: T) {
        match self {
            Patch::Keep => {}
            Patch::Clear => *slot = default,
            Patch::Set(value) => *slot = value,
        }
    }
}

// `None` clears.
impl<T> From<Option<T>> for Patch<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Patch::Clear, Patch::Set)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryUpdate {
    pub customer_name: Patch<String>,
    pub phone: Patch<String>,
    pub region: Patch<OptionSet>,
    pub gender: Patch<OptionSet>,
    pub product_category: Patch<OptionSet>,
    pub tag: Patch<OptionSet>,
    pub payment_method: Patch<OptionSet>,
    pub age_min: Patch<u32>,
    pub age_max: Patch<u32>,
    pub date_from: Patch<NaiveDate>,
    pub date_to: Patch<NaiveDate>,
    pub sort_by: Patch<SortBy>,
    pub sort_order: Patch<SortOrder>,
    pub page: Patch<u32>,
    pub page_size: Patch<u32>,
}

impl QueryUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn search(
        customer_name: impl Into<Patch<String>>,
        phone: impl Into<Patch<String>>,
    ) -> Self {
        Self {
            customer_name: customer_name.into(),
            phone: phone.into(),
            ..Self::default()
        }
    }

    pub fn sort(sort_by: SortBy, sort_order: SortOrder) -> Self {
        Self {
            sort_by: Patch::Set(sort_by),
            sort_order: Patch::Set(sort_order),
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, field: FilterField, patch: impl Into<Patch<OptionSet>>) -> Self {
        *self.filter_patch_mut(field) = patch.into();
        self
    }

    pub fn with_age_range(
        mut self,
        min: impl Into<Patch<u32>>,
        max: impl Into<Patch<u32>>,
    ) -> Self {
        self.age_min = min.into();
        self.age_max = max.into();
        self
    }

    pub fn with_date_range(
        mut self,
        from: impl Into<Patch<NaiveDate>>,
        to: impl Into<Patch<NaiveDate>>,
    ) -> Self {
        self.date_from = from.into();
        self.date_to = to.into();
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Patch::Set(page);
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Patch::Set(page_size);
        self
    }

    pub fn filter_patch_mut(&mut self, field: FilterField) -> &mut Patch<OptionSet> {
        match field {
            FilterField::Region => &mut self.region,
            FilterField::Gender => &mut self.gender,
            FilterField::ProductCategory => &mut self.product_category,
            FilterField::Tag => &mut self.tag,
            FilterField::PaymentMethod => &mut self.payment_method,
        }
    }
}

pub fn parse_age(field: &'static str, raw: &str) -> Result<Option<u32>, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<u32>()
        .map(Some)
        .map_err(|_| ValidationError::InvalidNumber {
            field,
            raw: raw.to_string(),
        })
}

pub fn parse_date(field: &'static str, raw: &str) -> Result<Option<NaiveDate>, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| ValidationError::InvalidDate {
            field,
            raw: raw.to_string(),
        })
}
