use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::models::{Fields, ListingId};
use crate::scrapers::client::ApiClient;
use crate::scrapers::traits::DetailProvider;
use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use scraper::Html;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::LazyLock;
use tracing::debug;

/// Amenity ids look like `wireless_internet_4_` or `sys_pets_allowed_12_`
static RE_AMENITY_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-z0-9]+_)+([0-9]+)_").expect("amenity id pattern compiles"));

/// Detail provider for the v3 `PdpPlatformSections` endpoint, with the
/// listing's reviews from `PdpReviews`
pub struct PdpSectionsClient {
    api: ApiClient,
    review_page_size: u32,
    max_reviews: usize,
}

impl PdpSectionsClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(config)?,
            review_page_size: config.review_page_size,
            max_reviews: config.max_reviews,
        })
    }

    fn review_variables(listing_id: &ListingId, limit: u32, offset: usize) -> Value {
        let mut request = json!({
            "fieldSelector": "for_p3",
            "limit": limit,
            "listingId": listing_id.as_str(),
            "numberOfAdults": "1",
            "numberOfChildren": "0",
            "numberOfInfants": "0",
        });
        if offset > 0 {
            request["offset"] = json!(offset);
        }
        json!({ "request": request })
    }

    fn request_variables(listing_id: &ListingId) -> Value {
        json!({
            "request": {
                "id": listing_id.as_str(),
                "layouts": ["SIDEBAR", "SINGLE_COLUMN"],
                "preview": false,
                "bypassTargetings": false,
                "adults": "1",
                "privateBooking": false,
                "invitationClaimed": false,
                "staysBookingMigrationEnabled": false,
                "useNewSectionWrapperApi": false,
            }
        })
    }
}

#[async_trait]
impl DetailProvider for PdpSectionsClient {
    async fn fetch_detail(&self, listing_id: &ListingId) -> std::result::Result<Fields, ProviderError> {
        let data = self
            .api
            .get_operation("PdpPlatformSections", Self::request_variables(listing_id))
            .await?;
        let mut fields = parse_listing_detail(&data, self.api.base_url())?;

        if self.review_page_size > 0 {
            let reviews = collect_reviews(self.review_page_size, self.max_reviews, |offset| {
                self.api.get_operation(
                    "PdpReviews",
                    Self::review_variables(listing_id, self.review_page_size, offset),
                )
            })
            .await?;
            fields.insert("reviews".to_string(), Value::Array(reviews));
        }

        debug!("Parsed {} detail field(s) for {}", fields.len(), listing_id);
        Ok(fields)
    }

    fn source_name(&self) -> &'static str {
        "PdpPlatformSections"
    }
}

/// Parse a `PdpPlatformSections` response into detail-stage fields
///
/// Sections the listing doesn't carry are skipped; only a response without
/// `pdpSections` at all is an error.
pub fn parse_listing_detail(data: &Value, base_url: &str) -> std::result::Result<Fields, ProviderError> {
    let pdp = data
        .pointer("/data/merlin/pdpSections")
        .filter(|v| v.is_object())
        .ok_or_else(|| ProviderError::Schema("response has no pdpSections".to_string()))?;

    let listing_id = match pdp.get("id") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => return Err(ProviderError::Schema("pdpSections has no id".to_string())),
    };

    let sections = pdp
        .get("sections")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let section = |id: &str| {
        sections
            .iter()
            .find(|s| s.get("sectionId").and_then(Value::as_str) == Some(id))
            .and_then(|s| s.get("section"))
    };

    let mut fields = Fields::new();
    fields.insert("url".to_string(), json!(format!("{}/rooms/{}", base_url, listing_id)));

    if let Some(amenities) = section("AMENITIES_DEFAULT") {
        let groups = array(amenities, "seeAllAmenitiesGroups");
        let available: Vec<&Value> = groups
            .iter()
            .flat_map(|g| array(g, "amenities"))
            .filter(|a| a.get("available").and_then(Value::as_bool).unwrap_or(false))
            .collect();
        let titles: Vec<String> = available
            .iter()
            .filter_map(|a| render_title(a, " - "))
            .collect();
        let ids: Vec<u64> = available
            .iter()
            .filter_map(|a| a.get("id").and_then(Value::as_str))
            .filter_map(amenity_id)
            .collect();
        fields.insert("amenities".to_string(), json!(titles));
        fields.insert("amenity_ids".to_string(), json!(ids));

        let access = groups
            .iter()
            .find(|g| g.get("title").and_then(Value::as_str) == Some("Guest access"))
            .map(|g| render_titles(array(g, "amenities")));
        if let Some(access) = access {
            fields.insert("access".to_string(), json!(access));
        }
    }

    if let Some(html) = section("DESCRIPTION_DEFAULT")
        .and_then(|s| s.pointer("/htmlDescription/htmlText"))
        .and_then(Value::as_str)
    {
        fields.insert("description".to_string(), json!(html_to_text(html)));
    }

    if let Some(policies) = section("POLICIES_DEFAULT") {
        let house_rules: Vec<&str> = array(policies, "houseRules")
            .iter()
            .filter_map(|r| r.get("title").and_then(Value::as_str))
            .collect();
        // the rule is only listed when events are forbidden
        let allows_events = !house_rules.contains(&"No parties or events");
        fields.insert("house_rules".to_string(), json!(house_rules));
        fields.insert("allows_events".to_string(), json!(allows_events));

        if let Some(rules) = policies.get("additionalHouseRules").filter(|v| !v.is_null()) {
            fields.insert("additional_house_rules".to_string(), rules.clone());
        }
        let expectations = array(policies, "listingExpectations");
        if !expectations.is_empty() {
            fields.insert(
                "listing_expectations".to_string(),
                json!(render_titles(expectations)),
            );
        }
    }

    if let Some(transit) = section("LOCATION_DEFAULT")
        .and_then(|s| titled_html(array(s, "seeAllLocationDetails"), "Getting around", "content"))
    {
        fields.insert("transit".to_string(), json!(transit));
    }
    if let Some(interaction) = section("HOST_PROFILE_DEFAULT")
        .and_then(|s| titled_html(array(s, "hostInfos"), "During your stay", "html"))
    {
        fields.insert("interaction".to_string(), json!(interaction));
    }

    if let Some(logging) = pdp.pointer("/metadata/loggingContext/eventDataLogging") {
        for (source, target) in [
            ("accuracyRating", "rating_accuracy"),
            ("checkinRating", "rating_checkin"),
            ("cleanlinessRating", "rating_cleanliness"),
            ("communicationRating", "rating_communication"),
            ("locationRating", "rating_location"),
            ("valueRating", "rating_value"),
            ("guestSatisfactionOverall", "satisfaction_guest"),
        ] {
            if let Some(value) = logging.get(source).filter(|v| !v.is_null()) {
                fields.insert(target.to_string(), value.clone());
            }
        }
    }

    if let Some(is_hotel) = pdp
        .pointer("/metadata/bookingPrefetchData/isHotelRatePlanEnabled")
        .and_then(Value::as_bool)
    {
        fields.insert("is_hotel".to_string(), json!(is_hotel));
    }

    Ok(fields)
}

/// Page through a listing's reviews until the reported count is reached
async fn collect_reviews<F, Fut>(
    page_size: u32,
    max_reviews: usize,
    mut fetch_page: F,
) -> std::result::Result<Vec<Value>, ProviderError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = std::result::Result<Value, ProviderError>>,
{
    let mut reviews = Vec::new();
    let mut offset = 0;

    loop {
        let (batch, total) = parse_reviews_page(&fetch_page(offset).await?)?;
        if batch.is_empty() {
            break;
        }
        reviews.extend(batch);
        offset += page_size as usize;
        if offset >= total.min(max_reviews) {
            break;
        }
    }

    reviews.truncate(max_reviews);
    Ok(reviews)
}

/// One `PdpReviews` page: the distilled reviews and the listing's total count
pub fn parse_reviews_page(data: &Value) -> std::result::Result<(Vec<Value>, usize), ProviderError> {
    let pdp_reviews = data
        .pointer("/data/merlin/pdpReviews")
        .filter(|v| v.is_object())
        .ok_or_else(|| ProviderError::Schema("response has no pdpReviews".to_string()))?;

    let total = match pdp_reviews.pointer("/metadata/reviewsCount") {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0) as usize,
        Some(Value::String(s)) => s
            .parse()
            .map_err(|_| ProviderError::Schema(format!("bad reviewsCount: {}", s)))?,
        _ => return Err(ProviderError::Schema("pdpReviews has no reviewsCount".to_string())),
    };

    let reviews = array(pdp_reviews, "reviews")
        .iter()
        .map(|r| {
            json!({
                "comments": r.get("comments").cloned().unwrap_or(Value::Null),
                "created_at": r.get("createdAt").cloned().unwrap_or(Value::Null),
                "language": r.get("language").cloned().unwrap_or(Value::Null),
                "rating": r.get("rating").cloned().unwrap_or(Value::Null),
                "response": r.get("response").cloned().unwrap_or(Value::Null),
            })
        })
        .collect();

    Ok((reviews, total))
}

/// Numeric part of an amenity id such as `wireless_internet_4_`
fn amenity_id(id: &str) -> Option<u64> {
    RE_AMENITY_ID
        .captures(id)
        .and_then(|caps| caps.get(2))
        .and_then(|m| m.as_str().parse().ok())
}

fn array<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// "title<sep>subtitle", or just the title
fn render_title(item: &Value, sep: &str) -> Option<String> {
    let title = item.get("title").and_then(Value::as_str)?;
    match item.get("subtitle").and_then(Value::as_str) {
        Some(subtitle) if !subtitle.is_empty() => Some(format!("{}{}{}", title, sep, subtitle)),
        _ => Some(title.to_string()),
    }
}

fn render_titles(items: &[Value]) -> String {
    items
        .iter()
        .filter_map(|item| render_title(item, ": "))
        .collect::<Vec<_>>()
        .join("\n")
}

fn titled_html(items: &[Value], title: &str, key: &str) -> Option<String> {
    items
        .iter()
        .find(|i| i.get("title").and_then(Value::as_str) == Some(title))
        .and_then(|i| i.get(key))
        .and_then(|v| v.get("htmlText"))
        .and_then(Value::as_str)
        .map(html_to_text)
}

fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text: String = fragment.root_element().text().collect::<Vec<_>>().join(" ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
