use serde::Deserialize;

use crate::parser::extract::vin::VinLocators;
use crate::parser::extract::Bounds;
use crate::parser::html::Locator;
use crate::parser::listing::Strategy;

pub const PAGE_PLACEHOLDER: &str = "{page}";

/// Everything the collector needs to know about one listing site.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceProfile {
    /// Key used on the command line and in file names (`cargurus`).
    pub name: String,
    /// Provenance label written to the `Source` column (`CarGurus`).
    pub label: String,
    /// Prefix for generated row IDs (`CG` -> `CG_0001`).
    pub id_prefix: String,
    /// Result page URLs, each with a `{page}` placeholder. Searches are
    /// walked in order.
    pub search_urls: Vec<String>,
    #[serde(default = "Bounds::open")]
    pub price_bounds: Bounds,
    #[serde(default = "Bounds::open")]
    pub mileage_bounds: Bounds,
    pub strategy: Strategy,
}

impl SourceProfile {
    pub fn page_url(template: &str, page: usize) -> String {
        template.replace(PAGE_PLACEHOLDER, &page.to_string())
    }

    pub fn row_id(&self, n: usize) -> String {
        format!("{}_{:04}", self.id_prefix, n)
    }

    /// The three sites the tool ships with.
    pub fn builtin() -> Vec<SourceProfile> {
        vec![cars_com(), cargurus(), autotempest()]
    }
}

fn cars_com() -> SourceProfile {
    SourceProfile {
        name: "cars_com".into(),
        label: "Cars.com".into(),
        id_prefix: "CARS".into(),
        search_urls: vec![
            "https://www.cars.com/shopping/results/?stock_type=used&page_size=20&zip=10001&sort=best_match&page={page}"
                .into(),
        ],
        price_bounds: Bounds::open(),
        mileage_bounds: Bounds::open(),
        strategy: Strategy::DetailPages {
            card: "div.vehicle-card".into(),
            link: "a.vehicle-card-link".into(),
            base_url: "https://www.cars.com".into(),
            price: Locator::css("span.primary-price"),
            card_mileage: vec![Locator::css(r#"div.mileage, span.mileage, div[class*="mileage"]"#)],
            vin: VinLocators {
                meta_css: Some(r#"meta[property="vehicle:vin"]"#.into()),
                meta_attr: "content".into(),
                primary: Some(Locator::css("li.vin-number span")),
                alternatives: vec![
                    Locator::css("div.vin-number"),
                    Locator::label_next("dt", "VIN", "dd"),
                    Locator::containing("span", "VIN"),
                ],
            },
            detail_mileage: vec![
                Locator::label_next("dt", "Mileage", "dd"),
                Locator::css(r#"div[class*="mileage"]"#),
                Locator::css(r#"span[class*="mileage"]"#),
                Locator::containing("li", "Mileage"),
            ],
        },
    }
}

fn cargurus() -> SourceProfile {
    SourceProfile {
        name: "cargurus".into(),
        label: "CarGurus".into(),
        id_prefix: "CG".into(),
        search_urls: vec![concat!(
            "https://www.cargurus.com/Cars/inventorylisting/viewDetailsFilterViewInventoryListing.action",
            "?sourceContext=carGurusHomePageModel&entitySelectingHelper.selectedEntity=d835",
            "&zip=90210&distance=500&minPrice=1000&maxPrice=50000&maxMileage=200000",
            "&sortType=AGE_DESC&page={page}"
        )
        .into()],
        price_bounds: Bounds::new(1_000, 100_000),
        mileage_bounds: Bounds::new(1, 200_000),
        strategy: Strategy::VinAttribute {
            attribute: "data-vin".into(),
            containers: vec!["div".into(), "li".into(), "article".into()],
            context_chars: 250,
            scan_text: true,
            min_digits: 0,
        },
    }
}

fn autotempest() -> SourceProfile {
    let searches = [
        ("ford", "f-150"),
        ("ford", "mustang"),
        ("toyota", "camry"),
        ("toyota", "rav4"),
        ("honda", "civic"),
        ("honda", "accord"),
        ("chevrolet", "silverado-1500"),
        ("chevrolet", "camaro"),
        ("bmw", "3-series"),
        ("jeep", "wrangler"),
    ];
    SourceProfile {
        name: "autotempest".into(),
        label: "AutoTempest".into(),
        id_prefix: "AT".into(),
        search_urls: searches
            .iter()
            .map(|(make, model)| {
                format!("https://www.autotempest.com/results?zip=90210&make={make}&model={model}&page={{page}}")
            })
            .collect(),
        price_bounds: Bounds::new(1_000, 200_000),
        mileage_bounds: Bounds::new(10, 300_000),
        strategy: Strategy::CardScan {
            cards: vec![
                "div.result-item".into(),
                "div.listing".into(),
                "div.vehicle-card".into(),
                "div[class*='result']".into(),
                "div[class*='listing']".into(),
                "article[class*='listing']".into(),
            ],
            max_cards: 100,
            context_chars: 1000,
            max_page_vins: 50,
            min_digits: 5,
        },
    }
}
