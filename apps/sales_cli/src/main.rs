use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use client_core::{
    coerce_age, coerce_date, coerce_text, load_settings, HttpSalesApi, QueryController,
    QueryState, QueryStatus, SalesBrowser,
};
use shared::{
    domain::{FilterField, OptionSet, Patch, QueryModel, QueryUpdate, SortBy, SortOrder},
    protocol::{Metadata, ResultPage},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Browse one page of the sales dataset.
#[derive(Parser, Debug)]
struct Args {
    /// Overrides `api_base` from sales.toml and the environment.
    #[arg(long)]
    api_base: Option<String>,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    phone: Option<String>,
    #[arg(long, value_delimiter = ',')]
    region: Vec<String>,
    #[arg(long, value_delimiter = ',')]
    gender: Vec<String>,
    #[arg(long, value_delimiter = ',')]
    category: Vec<String>,
    #[arg(long, value_delimiter = ',')]
    tag: Vec<String>,
    #[arg(long, value_delimiter = ',')]
    payment: Vec<String>,
    #[arg(long)]
    age_min: Option<String>,
    #[arg(long)]
    age_max: Option<String>,
    /// YYYY-MM-DD
    #[arg(long)]
    date_from: Option<String>,
    /// YYYY-MM-DD
    #[arg(long)]
    date_to: Option<String>,
    /// date, quantity or customer_name
    #[arg(long)]
    sort_by: Option<SortBy>,
    /// asc or desc
    #[arg(long)]
    order: Option<SortOrder>,
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long)]
    page_size: Option<u32>,
    /// Also print the available filter options.
    #[arg(long)]
    meta: bool,
    /// Print the page as JSON instead of a table.
    #[arg(long)]
    json: bool,
}

impl Args {
    fn query_update(&self) -> QueryUpdate {
        let raw = |value: &Option<String>| value.as_deref().unwrap_or_default().to_string();

        let mut update = QueryUpdate {
            customer_name: coerce_text(&raw(&self.name)),
            phone: coerce_text(&raw(&self.phone)),
            age_min: coerce_age("age_min", &raw(&self.age_min)),
            age_max: coerce_age("age_max", &raw(&self.age_max)),
            date_from: coerce_date("date_from", &raw(&self.date_from)),
            date_to: coerce_date("date_to", &raw(&self.date_to)),
            ..QueryUpdate::default()
        };
        for (field, values) in [
            (FilterField::Region, &self.region),
            (FilterField::Gender, &self.gender),
            (FilterField::ProductCategory, &self.category),
            (FilterField::Tag, &self.tag),
            (FilterField::PaymentMethod, &self.payment),
        ] {
            let options: OptionSet = values.iter().map(|v| v.trim()).collect();
            *update.filter_patch_mut(field) = Patch::Set(options);
        }
        if let Some(sort_by) = self.sort_by {
            update.sort_by = Patch::Set(sort_by);
        }
        if let Some(order) = self.order {
            update.sort_order = Patch::Set(order);
        }
        if let Some(page_size) = self.page_size {
            update.page_size = Patch::Set(page_size);
        }
        update.with_page(self.page)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = load_settings()?;
    if let Some(api_base) = args.api_base.clone() {
        settings.api_base = api_base;
    }
    info!("sales_cli: using api_base={}", settings.api_base);

    let mut controller = QueryController::with_model(QueryModel {
        page_size: settings.page_size,
        ..QueryModel::default()
    });
    let model = controller.apply_partial(args.query_update()).clone();
    let active_filters = model.active_filter_count();

    let api = Arc::new(HttpSalesApi::new(settings.api_base.clone()));
    let browser = SalesBrowser::with_model(api, &settings, model);

    if args.meta {
        print_metadata(&browser.wait_for_metadata().await)?;
    }

    let results = browser.wait_for_results().await;
    let page = match (results.status, results.data, results.error) {
        (QueryStatus::Success, Some(page), _) => page,
        (_, _, Some(err)) => bail!("failed to load sales: {err}"),
        _ => bail!("failed to load sales"),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(page.as_ref())?);
        return Ok(());
    }
    print_page(&page, active_filters);
    Ok(())
}

fn print_metadata(state: &QueryState<Metadata>) -> Result<()> {
    let Some(meta) = state.data.as_deref() else {
        match &state.error {
            Some(err) => bail!("failed to load filter options: {err}"),
            None => bail!("failed to load filter options"),
        }
    };
    println!("Regions:            {}", meta.regions.join(", "));
    println!("Genders:            {}", meta.genders.join(", "));
    println!("Product categories: {}", meta.product_categories.join(", "));
    println!("Tags:               {}", meta.tags.join(", "));
    println!("Payment methods:    {}", meta.payment_methods.join(", "));
    println!();
    Ok(())
}

fn print_page(page: &ResultPage, active_filters: usize) {
    if page.items.is_empty() {
        println!("No records match the current filters.");
    } else {
        println!(
            "{:<12} {:<24} {:<14} {:<8} {:<14} {:>4} {:>12}",
            "Date", "Customer", "Phone", "Region", "Category", "Qty", "Final amount"
        );
        for record in &page.items {
            println!(
                "{:<12} {:<24} {:<14} {:<8} {:<14} {:>4} {:>12.2}",
                record.date,
                record.customer_name,
                record.phone_number,
                record.customer_region,
                record.product_category,
                record.quantity,
                record.final_amount
            );
        }
    }

    println!();
    println!("Showing {} of {} records", page.items.len(), page.total);
    println!("Page {} of {}", page.page, page.total_pages.max(1));
    if active_filters > 0 {
        println!("Filters applied: {active_filters}");
    }
}
