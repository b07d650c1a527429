//! POS XML payload parsing and response building.
//!
//! The POS speaks the Gilbarco loyalty-interface dialect: one or more XML
//! documents per frame, occasionally preceded by stray control bytes. The
//! parser scans for the known top-level request tags, splits the payload
//! into fragments, and extracts only the fields the engine consumes —
//! unknown elements are ignored.

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::debug;

use tier3_core::basket::BasketLine;
use tier3_core::request::{AvtStatus, RewardsRequest, TransactionFlags};
use tier3_core::stages::pricing::Reward;

use super::error::ProtocolError;

/// Loyalty interface version echoed in every response header.
pub const INTERFACE_VERSION: &str = "1.2";
const VENDOR_NAME: &str = "Gilbarco";
const VENDOR_MODEL_VERSION: &str = "12.23.03.02";

/// Top-level request tags this service recognizes.
const KNOWN_REQUEST_TAGS: [&str; 6] = [
    "GetLoyaltyOnlineStatusRequest",
    "GetRewardsRequest",
    "FinalizeRewardsRequest",
    "CancelTransactionRequest",
    "BeginCustomerRequest",
    "EndCustomerRequest",
];

/// One parsed POS request.
#[derive(Debug, Clone, PartialEq)]
pub enum PosRequest {
    GetLoyaltyOnlineStatus {
        pos_sequence_id: String,
    },
    GetRewards(Box<GetRewardsEnvelope>),
    FinalizeRewards {
        pos_sequence_id: String,
        offline: bool,
        loyalty_reward_id: Option<String>,
    },
    CancelTransaction {
        pos_sequence_id: String,
    },
    /// No response is written for these; the POS does not expect one.
    BeginCustomer,
    EndCustomer,
    /// Recognized as XML but not a known request; answered with a generic OK.
    Other {
        tag: String,
    },
}

/// A `GetRewardsRequest` with its header context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetRewardsEnvelope {
    pub pos_sequence_id: String,
    pub loyalty_sequence_id: Option<String>,
    /// Loyalty reward ids already applied to this transaction; the response
    /// removes them before adding the fresh rewards.
    pub existing_reward_ids: Vec<String>,
    pub request: RewardsRequest,
}

/// Splits a frame payload into XML fragments, one per top-level document.
///
/// Leading bytes before the first `<` are dropped; fragments shorter than a
/// plausible document or not starting with a recognizable tag are skipped.
#[must_use]
pub fn split_fragments(payload: &str) -> Vec<&str> {
    let Some(first) = payload.find('<') else {
        return Vec::new();
    };
    let trimmed = &payload[first..];

    let mut starts: Vec<usize> = Vec::new();
    for tag in KNOWN_REQUEST_TAGS {
        let needle = format!("<{tag}");
        let mut from = 0;
        while let Some(pos) = trimmed[from..].find(&needle) {
            starts.push(from + pos);
            from += pos + needle.len();
        }
    }
    if starts.is_empty() {
        // Unknown document: hand the whole payload to the router so it can
        // answer with a generic OK.
        return vec![trimmed.trim()];
    }
    starts.sort_unstable();

    let mut fragments = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(trimmed.len());
        let fragment = trimmed[start..end].trim();
        if !fragment.is_empty() {
            fragments.push(fragment);
        }
    }
    fragments
}

/// Parses one XML fragment into a [`PosRequest`].
pub fn parse_request(fragment: &str) -> Result<PosRequest, ProtocolError> {
    let root = root_tag(fragment)
        .ok_or_else(|| ProtocolError::malformed("payload contains no XML element"))?;

    match root.as_str() {
        "GetLoyaltyOnlineStatusRequest" => Ok(PosRequest::GetLoyaltyOnlineStatus {
            pos_sequence_id: scan_text(fragment, &["POSSequenceID"]).unwrap_or_default(),
        }),
        "GetRewardsRequest" => parse_get_rewards(fragment).map(|e| PosRequest::GetRewards(Box::new(e))),
        "FinalizeRewardsRequest" => {
            let offline = scan_attr(fragment, "LoyaltyOfflineFlag", "value")
                .is_some_and(|v| v.eq_ignore_ascii_case("yes"));
            Ok(PosRequest::FinalizeRewards {
                pos_sequence_id: scan_text(fragment, &["POSSequenceID"]).unwrap_or_default(),
                offline,
                loyalty_reward_id: scan_text(fragment, &["LoyaltyRewardID"])
                    .filter(|s| !s.is_empty()),
            })
        }
        "CancelTransactionRequest" => Ok(PosRequest::CancelTransaction {
            pos_sequence_id: scan_text(fragment, &["POSSequenceID"]).unwrap_or_default(),
        }),
        "BeginCustomerRequest" => Ok(PosRequest::BeginCustomer),
        "EndCustomerRequest" => Ok(PosRequest::EndCustomer),
        other => Ok(PosRequest::Other {
            tag: other.to_string(),
        }),
    }
}

/// Parses the rewards request proper.
///
/// A request that yields no transaction id or no usable basket line is
/// rejected at ingress; the engine never sees it.
fn parse_get_rewards(fragment: &str) -> Result<GetRewardsEnvelope, ProtocolError> {
    let mut envelope = GetRewardsEnvelope::default();
    let mut reader = Reader::from_str(fragment);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<String> = Vec::new();
    let mut current_line: Option<PendingLine> = None;
    let mut current_promo: Option<PendingPromotion> = None;
    let mut avt_value: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                if name == "TransactionLine" {
                    current_line = Some(PendingLine::default());
                } else if name == "Promotion" {
                    let status = attr_value(&start, "status");
                    current_promo = Some(PendingPromotion {
                        normal: status.as_deref() == Some("normal"),
                        ..PendingPromotion::default()
                    });
                } else if is_avt_tag(&name) {
                    if let Some(value) = attr_value(&start, "value") {
                        avt_value = Some(value);
                    }
                }
                stack.push(name);
            }
            Ok(Event::Empty(start)) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                if is_avt_tag(&name) {
                    if let Some(value) = attr_value(&start, "value") {
                        avt_value = Some(value);
                    }
                }
            }
            Ok(Event::Text(text)) => {
                let value = text
                    .unescape()
                    .map_err(|e| ProtocolError::malformed(format!("bad XML text: {e}")))?
                    .trim()
                    .to_string();
                if value.is_empty() {
                    continue;
                }
                let Some(element) = stack.last() else {
                    continue;
                };
                assign_field(
                    &mut envelope,
                    &mut current_line,
                    &mut current_promo,
                    &mut avt_value,
                    element,
                    value,
                );
            }
            Ok(Event::End(end)) => {
                let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                if name == "TransactionLine" {
                    if let Some(line) = current_line.take() {
                        if let Some(basket_line) = line.into_basket_line() {
                            envelope.request.lines.push(basket_line);
                        }
                    }
                } else if name == "Promotion" {
                    if let Some(promo) = current_promo.take() {
                        if promo.normal
                            && promo.reason_is_loyalty
                            && !promo.reward_id.is_empty()
                        {
                            envelope.existing_reward_ids.push(promo.reward_id);
                        }
                    }
                }
                stack.pop();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(ProtocolError::malformed(format!("XML parse error: {e}")));
            }
        }
    }

    envelope.request.avt_status = avt_value.as_deref().map(AvtStatus::parse);

    if envelope
        .request
        .transaction_id
        .as_deref()
        .map_or(true, str::is_empty)
    {
        return Err(ProtocolError::malformed(
            "GetRewardsRequest carries no POSTransactionID",
        ));
    }
    if envelope.request.lines.is_empty() {
        return Err(ProtocolError::malformed(
            "GetRewardsRequest carries no usable transaction line",
        ));
    }

    debug!(
        transaction_id = envelope.request.transaction_id.as_deref().unwrap_or("-"),
        lines = envelope.request.lines.len(),
        existing_rewards = envelope.existing_reward_ids.len(),
        "rewards request parsed"
    );
    Ok(envelope)
}

fn assign_field(
    envelope: &mut GetRewardsEnvelope,
    current_line: &mut Option<PendingLine>,
    current_promo: &mut Option<PendingPromotion>,
    avt_value: &mut Option<String>,
    element: &str,
    value: String,
) {
    if let Some(line) = current_line.as_mut() {
        match element {
            "LineNumber" => line.line_number = value.parse().ok(),
            "POSCode" | "POSCodeModifier" if line.upc.is_none() => line.upc = Some(value),
            "Description" => line.description = Some(value),
            "SalesQuantity" => line.quantity = parse_quantity(&value),
            "RegularSellPrice" | "RegularUnitPrice" => {
                line.unit_price = Decimal::from_str(&value).ok();
            }
            "ExtendedPrice" => line.extended_price = Decimal::from_str(&value).ok(),
            _ => {}
        }
        return;
    }
    if let Some(promo) = current_promo.as_mut() {
        match element {
            "LoyaltyRewardID" => promo.reward_id = value,
            "PromotionReason" => {
                promo.reason_is_loyalty = value.to_ascii_lowercase().contains("loyalty");
            }
            _ => {}
        }
        return;
    }
    match element {
        "POSSequenceID" => envelope.pos_sequence_id = value,
        "LoyaltySequenceID" => envelope.loyalty_sequence_id = Some(value),
        "StoreLocationID" => envelope.request.store_location_id = Some(value),
        "POSTransactionID" => envelope.request.transaction_id = Some(value),
        "LoyaltyID" => envelope.request.loyalty_id = Some(value),
        "CashierID" | "EmployeeID" | "Cashier" => envelope.request.cashier_id = Some(value),
        element if is_avt_tag(element) && avt_value.is_none() => *avt_value = Some(value),
        _ => {}
    }
}

fn is_avt_tag(name: &str) -> bool {
    matches!(name, "AgeVerified" | "AVT" | "AgeStatus" | "AgeVerification")
}

#[derive(Debug, Default)]
struct PendingLine {
    line_number: Option<u32>,
    upc: Option<String>,
    quantity: Option<u32>,
    unit_price: Option<Decimal>,
    extended_price: Option<Decimal>,
    description: Option<String>,
}

impl PendingLine {
    /// The unit price falls back to the extended price divided by quantity
    /// when the POS omits it.
    fn into_basket_line(self) -> Option<BasketLine> {
        let quantity = self.quantity.unwrap_or(1);
        let unit_price = self.unit_price.or_else(|| {
            self.extended_price
                .filter(|_| quantity > 0)
                .map(|ext| ext / Decimal::from(quantity))
        })?;
        Some(BasketLine {
            line_number: self.line_number?,
            upc: self.upc,
            quantity,
            unit_price,
            description: self.description,
        })
    }
}

#[derive(Debug, Default)]
struct PendingPromotion {
    normal: bool,
    reward_id: String,
    reason_is_loyalty: bool,
}

fn parse_quantity(value: &str) -> Option<u32> {
    value
        .parse::<u32>()
        .ok()
        .or_else(|| Decimal::from_str(value).ok().and_then(|d| d.to_u32()))
}

fn attr_value(start: &quick_xml::events::BytesStart<'_>, name: &str) -> Option<String> {
    start.attributes().flatten().find_map(|attr| {
        (attr.key.as_ref() == name.as_bytes())
            .then(|| String::from_utf8_lossy(&attr.value).into_owned())
    })
}

/// Tag name of the first element in the fragment.
fn root_tag(fragment: &str) -> Option<String> {
    let mut reader = Reader::from_str(fragment);
    loop {
        match reader.read_event() {
            Ok(Event::Start(start) | Event::Empty(start)) => {
                return Some(String::from_utf8_lossy(start.name().as_ref()).into_owned());
            }
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

/// First text content of any of the named elements, scanning the fragment.
fn scan_text(fragment: &str, names: &[&str]) -> Option<String> {
    let mut reader = Reader::from_str(fragment);
    reader.config_mut().trim_text(true);
    let mut capture = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                capture = names
                    .iter()
                    .any(|n| start.name().as_ref() == n.as_bytes());
            }
            Ok(Event::Text(text)) if capture => {
                let value = text.unescape().ok()?.trim().to_string();
                return Some(value);
            }
            Ok(Event::End(_)) => capture = false,
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

/// Value attribute of the first element with the given name.
fn scan_attr(fragment: &str, element: &str, attr: &str) -> Option<String> {
    let mut reader = Reader::from_str(fragment);
    loop {
        match reader.read_event() {
            Ok(Event::Start(start) | Event::Empty(start)) => {
                if start.name().as_ref() == element.as_bytes() {
                    return attr_value(&start, attr);
                }
            }
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn response_header(pos_sequence_id: &str, loyalty_sequence_id: &str) -> String {
    format!(
        "<ResponseHeader>\
         <POSLoyaltyInterfaceVersion>{INTERFACE_VERSION}</POSLoyaltyInterfaceVersion>\
         <VendorName>{VENDOR_NAME}</VendorName>\
         <VendorModelVersion>{VENDOR_MODEL_VERSION}</VendorModelVersion>\
         <POSSequenceID>{}</POSSequenceID>\
         <LoyaltySequenceID>{}</LoyaltySequenceID>\
         </ResponseHeader>",
        escape(pos_sequence_id),
        escape(loyalty_sequence_id),
    )
}

/// Builds the `GetLoyaltyOnlineStatusResponse`.
#[must_use]
pub fn build_online_status_response(pos_sequence_id: &str, prompt: bool) -> String {
    format!(
        "<GetLoyaltyOnlineStatusResponse>{}<PromptForLoyaltyFlag value=\"{}\"></PromptForLoyaltyFlag></GetLoyaltyOnlineStatusResponse>",
        response_header(pos_sequence_id, ""),
        yes_no(prompt),
    )
}

/// Builds the `GetRewardsResponse`.
#[must_use]
pub fn build_get_rewards_response(
    pos_sequence_id: &str,
    loyalty_sequence_id: &str,
    loyalty_id: &str,
    lid_valid: bool,
    flags: TransactionFlags,
    remove_reward_ids: &[String],
    rewards: &[Reward],
    reward_id_override: Option<&str>,
    receipt_lines: &[String],
) -> String {
    let mut actions = String::new();
    for reward_id in remove_reward_ids {
        actions.push_str(&format!(
            "<RemoveReward><LoyaltyRewardID>{}</LoyaltyRewardID></RemoveReward>",
            escape(reward_id.as_str()),
        ));
    }
    for (index, reward) in rewards.iter().enumerate() {
        let reward_id = match (index, reward_id_override) {
            (0, Some(id)) => id,
            _ => reward.reward_id.as_str(),
        };
        actions.push_str(&format!(
            "<AddReward>\
             <LoyaltyRewardID>{}</LoyaltyRewardID>\
             <InstantRewardFlag value=\"yes\"></InstantRewardFlag>\
             <RewardTargetLineNumber>{}</RewardTargetLineNumber>\
             <RewardDiscountMethod>amountOff</RewardDiscountMethod>\
             <RewardValue>{:.2}</RewardValue>\
             <RewardLimit type=\"quantity\">1</RewardLimit>\
             <RewardReceiptDescShort>{}</RewardReceiptDescShort>\
             <RewardReceiptDescLong>{}</RewardReceiptDescLong>\
             </AddReward>",
            escape(reward_id),
            reward.line_number,
            reward.value,
            escape(reward.short_desc.as_str()),
            escape(reward.long_desc.as_str()),
        ));
    }

    let mut receipt = String::new();
    for line in receipt_lines {
        receipt.push_str(&format!(
            "<ReceiptLine>{}</ReceiptLine>",
            escape(line.as_str())
        ));
    }

    format!(
        "<GetRewardsResponse>{}\
         <LoyaltyIDValidFlag value=\"{}\">{}</LoyaltyIDValidFlag>\
         <AgeVerified value=\"{}\"></AgeVerified>\
         <EAIVVerified value=\"{}\"></EAIVVerified>\
         <Tier3Eligible value=\"{}\"></Tier3Eligible>\
         <CIDFundEligible value=\"{}\"></CIDFundEligible>\
         <RewardActions>{}</RewardActions>\
         <ReceiptText>{}</ReceiptText>\
         </GetRewardsResponse>",
        response_header(pos_sequence_id, loyalty_sequence_id),
        yes_no(lid_valid),
        escape(loyalty_id),
        yes_no(flags.age_verified),
        yes_no(flags.eaiv_verified),
        yes_no(flags.tier3_eligible),
        yes_no(flags.cid_fund_eligible),
        actions,
        receipt,
    )
}

/// Builds the `FinalizeRewardsResponse`; the failure shape is the literal
/// `Not Found` payload the POS expects.
#[must_use]
pub fn build_finalize_response(success: bool) -> String {
    if success {
        "<FinalizeRewardsResponse><ResponseHeader><Status>Success</Status></ResponseHeader></FinalizeRewardsResponse>"
            .to_string()
    } else {
        "Not Found".to_string()
    }
}

/// Builds the `CancelTransactionResponse`.
#[must_use]
pub fn build_cancel_response(pos_sequence_id: &str) -> String {
    format!(
        "<CancelTransactionResponse>{}</CancelTransactionResponse>",
        response_header(pos_sequence_id, ""),
    )
}

/// Generic OK for request tags without a dedicated handler.
#[must_use]
pub fn build_generic_ok(tag: &str) -> String {
    let base = tag.strip_suffix("Request").unwrap_or(tag);
    format!(
        "<{base}Response><ResponseHeader><Status>OK</Status></ResponseHeader></{base}Response>"
    )
}
