use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::models::{Candidate, Fields, Geography, ListingId, PriceQuote, RateQualifier};
use crate::planner::Subquery;
use crate::scrapers::client::{parse_money, ApiClient};
use crate::scrapers::traits::SearchProvider;
use crate::scrapers::types::{Cursor, SearchPage};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

const LISTINGS_SECTION: &str = "listings_ListingsGrid_Explore";

/// Search provider for the v3 `ExploreSearch` endpoint
pub struct ExploreSearchClient {
    api: ApiClient,
    room_types: Vec<String>,
    items_per_grid: u32,
}

impl ExploreSearchClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(config)?,
            room_types: Vec::new(),
            items_per_grid: 20,
        })
    }

    /// Restrict results to the given room types ("Entire home/apt", ...)
    pub fn with_room_types(mut self, room_types: Vec<String>) -> Self {
        self.room_types = room_types;
        self
    }

    fn request_variables(&self, subquery: &Subquery, cursor: Option<&Cursor>) -> Value {
        let mut request = json!({
            "metadataOnly": false,
            "itemsPerGrid": self.items_per_grid,
            "tabId": "home_tab",
            "refinementPaths": ["/homes"],
            "searchType": "search_query",
            "query": subquery.place,
            "currency": subquery.currency,
        });

        if let Some(fields) = request.as_object_mut() {
            if !self.room_types.is_empty() {
                fields.insert("roomTypes".to_string(), json!(self.room_types));
            }
            if let (Some(checkin), Some(checkout)) = (subquery.checkin, subquery.checkout) {
                fields.insert("checkin".to_string(), json!(checkin.to_string()));
                fields.insert("checkout".to_string(), json!(checkout.to_string()));
            }
            if let Some(min) = subquery.price.min {
                fields.insert("priceMin".to_string(), json!(min));
            }
            if let Some(max) = subquery.price.max {
                fields.insert("priceMax".to_string(), json!(max));
            }
            if let Some(neighborhood) = &subquery.neighborhood {
                fields.insert("neighborhoods".to_string(), json!([neighborhood]));
            }
            if let Some(Value::Object(continuation)) = cursor.map(Cursor::value) {
                for (key, value) in continuation {
                    fields.insert(key.clone(), value.clone());
                }
            }
        }

        json!({ "request": request })
    }
}

#[async_trait]
impl SearchProvider for ExploreSearchClient {
    async fn search(
        &self,
        subquery: &Subquery,
        cursor: Option<&Cursor>,
    ) -> std::result::Result<SearchPage, ProviderError> {
        let variables = self.request_variables(subquery, cursor);
        let data = self.api.get_operation("ExploreSearch", variables).await?;
        let mut page = parse_search_page(&data, subquery.checkin.is_some())?;
        page.next_cursor = carry_place_id(page.next_cursor, cursor);

        info!(
            "ExploreSearch {}: {} listing(s), more: {}",
            subquery,
            page.candidates.len(),
            page.has_more
        );
        Ok(page)
    }

    fn source_name(&self) -> &'static str {
        "ExploreSearch"
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaginationMetadata {
    has_next_page: bool,
    items_offset: Option<u64>,
    search_session_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeographyPayload {
    place_id: Option<String>,
    city: Option<String>,
    state: Option<String>,
    province: Option<String>,
    country: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListingItem {
    listing: ListingPayload,
    #[serde(rename = "pricingQuote")]
    pricing_quote: Option<PricingQuote>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListingPayload {
    id: Value,
    name: Option<String>,
    avg_rating: Option<f64>,
    bathrooms: Option<f64>,
    bedrooms: Option<u32>,
    beds: Option<u32>,
    is_business_travel_ready: Option<bool>,
    city: Option<String>,
    user: Option<HostPayload>,
    lat: Option<f64>,
    lng: Option<f64>,
    neighborhood_overview: Option<String>,
    person_capacity: Option<u32>,
    picture_count: Option<u32>,
    #[serde(default)]
    contextual_pictures: Vec<PicturePayload>,
    reviews_count: Option<u32>,
    room_and_property_type: Option<String>,
    room_type: Option<String>,
    room_type_category: Option<String>,
    star_rating: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct HostPayload {
    id: Value,
}

#[derive(Debug, Deserialize)]
struct PicturePayload {
    picture: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PricingQuote {
    monthly_price_factor: Option<f64>,
    weekly_price_factor: Option<f64>,
    rate_with_service_fee: Option<Amount>,
    structured_stay_display_price: Option<StructuredPrice>,
}

#[derive(Debug, Deserialize)]
struct Amount {
    amount: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StructuredPrice {
    primary_line: Option<PriceLine>,
    secondary_line: Option<PriceLine>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceLine {
    price: Option<String>,
    discounted_price: Option<String>,
    qualifier: Option<String>,
}

impl PriceLine {
    fn display_price(&self) -> Option<&str> {
        self.price.as_deref().or(self.discounted_price.as_deref())
    }
}

fn id_string(id: &Value) -> Option<String> {
    match id {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse an `ExploreSearch` response into a page of candidates
///
/// `dated` says whether the search carried checkin/checkout; only dated
/// searches show a total price.
pub fn parse_search_page(data: &Value, dated: bool) -> std::result::Result<SearchPage, ProviderError> {
    let explore = data
        .pointer("/data/dora/exploreV3")
        .ok_or_else(|| ProviderError::Schema("response has no exploreV3 section".to_string()))?;

    let pagination: PaginationMetadata = explore
        .pointer("/metadata/paginationMetadata")
        .cloned()
        .ok_or_else(|| ProviderError::Schema("response has no pagination metadata".to_string()))
        .and_then(|v| {
            serde_json::from_value(v)
                .map_err(|e| ProviderError::Schema(format!("bad pagination metadata: {}", e)))
        })?;

    let geography = explore
        .pointer("/metadata/geography")
        .cloned()
        .and_then(|v| serde_json::from_value::<GeographyPayload>(v).ok())
        .map(|g| Geography {
            place_id: g.place_id,
            city: g.city,
            state: g.state,
            province: g.province,
            country: g.country,
        });

    let sections = explore
        .get("sections")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut candidates = Vec::new();
    for section in sections {
        if section.get("sectionComponentType").and_then(Value::as_str) != Some(LISTINGS_SECTION) {
            continue;
        }
        let items = section
            .get("items")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for item in items {
            match serde_json::from_value::<ListingItem>(item.clone()) {
                Ok(item) => {
                    if let Some(candidate) = build_candidate(item, dated) {
                        candidates.push(candidate);
                    }
                }
                Err(e) => debug!("Skipping unreadable listing item: {}", e),
            }
        }
    }

    let next_cursor = if pagination.has_next_page {
        let mut continuation = serde_json::Map::new();
        if let Some(offset) = pagination.items_offset {
            continuation.insert("itemsOffset".to_string(), json!(offset));
        }
        if let Some(session_id) = pagination.search_session_id {
            continuation.insert("lastSearchSessionId".to_string(), json!(session_id));
        }
        if let Some(place_id) = geography.as_ref().and_then(|g| g.place_id.as_ref()) {
            continuation.insert("placeId".to_string(), json!(place_id));
        }
        (!continuation.is_empty()).then(|| Cursor::new(Value::Object(continuation)))
    } else {
        None
    };

    Ok(SearchPage {
        candidates,
        geography,
        has_more: pagination.has_next_page,
        next_cursor,
    })
}

/// Keep the first page's `placeId` on every later request, even when a
/// follow-up page leaves geography out
fn carry_place_id(next: Option<Cursor>, previous: Option<&Cursor>) -> Option<Cursor> {
    let place_id = previous.and_then(|c| c.value().get("placeId")).cloned();
    let Some(place_id) = place_id else {
        return next;
    };
    next.map(|cursor| match cursor.value() {
        Value::Object(map) if !map.contains_key("placeId") => {
            let mut continuation = map.clone();
            continuation.insert("placeId".to_string(), place_id);
            Cursor::new(Value::Object(continuation))
        }
        _ => cursor,
    })
}

fn build_candidate(item: ListingItem, dated: bool) -> Option<Candidate> {
    let listing = item.listing;
    let listing_id = id_string(&listing.id)?;

    let primary = item
        .pricing_quote
        .as_ref()
        .and_then(|p| p.structured_stay_display_price.as_ref())
        .and_then(|s| s.primary_line.as_ref());
    let price_rate = primary.and_then(PriceLine::display_price).and_then(parse_money);
    let qualifier = primary
        .and_then(|line| line.qualifier.as_deref())
        .map(RateQualifier::parse);

    let total_price = if dated {
        item.pricing_quote
            .as_ref()
            .and_then(|p| p.structured_stay_display_price.as_ref())
            .and_then(|s| s.secondary_line.as_ref().or(s.primary_line.as_ref()))
            .and_then(PriceLine::display_price)
            .and_then(parse_money)
    } else {
        None
    };

    // listings that need dates to show a rate carry no amount
    let quote = item.pricing_quote.as_ref().map(|pricing| PriceQuote {
        amount: pricing.rate_with_service_fee.as_ref().and_then(|fee| fee.amount),
        qualifier: qualifier.clone(),
        total: total_price,
    });

    let photos: Vec<&str> = listing
        .contextual_pictures
        .iter()
        .map(|p| p.picture.as_str())
        .collect();

    let fields = json!({
        "avg_rating": listing.avg_rating,
        "bathrooms": listing.bathrooms,
        "bedrooms": listing.bedrooms,
        "beds": listing.beds,
        "business_travel_ready": listing.is_business_travel_ready,
        "city": listing.city,
        "host_id": listing.user.as_ref().and_then(|u| id_string(&u.id)),
        "latitude": listing.lat,
        "longitude": listing.lng,
        "name": listing.name,
        "neighborhood_overview": listing.neighborhood_overview,
        "person_capacity": listing.person_capacity,
        "photo_count": listing.picture_count,
        "photos": photos,
        "review_count": listing.reviews_count,
        "room_and_property_type": listing.room_and_property_type,
        "room_type": listing.room_type,
        "room_type_category": listing.room_type_category,
        "star_rating": listing.star_rating,
        "monthly_price_factor": item.pricing_quote.as_ref().and_then(|p| p.monthly_price_factor),
        "weekly_price_factor": item.pricing_quote.as_ref().and_then(|p| p.weekly_price_factor),
        "price_rate": price_rate,
        "price_rate_type": qualifier.as_ref().map(RateQualifier::label),
        "total_price": total_price,
    });

    let fields: Fields = match fields {
        Value::Object(map) => map.into_iter().filter(|(_, v)| !v.is_null()).collect(),
        _ => Fields::new(),
    };

    Some(Candidate::new(ListingId::new(listing_id), fields, quote))
}
