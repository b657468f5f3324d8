use serde::Serialize;

/// One sofa listing recovered from a catalog page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListingRecord {
    pub name: String,
    pub price: Option<f64>,
    pub former_price: Option<f64>,
    pub discount_percent: Option<i32>,
    pub dimensions: Option<String>,
    pub sleeping_dimensions: Option<String>,
    pub detail_url: Option<String>,
    pub image_url: Option<String>,
    pub source_page: u32,
}

#[cfg(test)]
impl ListingRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            price: None,
            former_price: None,
            discount_percent: None,
            dimensions: None,
            sleeping_dimensions: None,
            detail_url: None,
            image_url: None,
            source_page: 1,
        }
    }
}
