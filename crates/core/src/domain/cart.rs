use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::menu::{MenuItemId, MenuOptionId};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedOption {
    pub id: MenuOptionId,
    pub name: String,
    pub price: Decimal,
}

/// One selected menu item with its quantity, as supplied by the
/// `add_burger_to_cart_tool` / `remove_burger_from_cart_tool` payloads.
///
/// Equality is structural over every field; two lines that differ only in
/// quantity or options are different lines.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    #[serde(rename = "id")]
    pub item_id: MenuItemId,
    pub name: String,
    #[serde(rename = "price")]
    pub unit_price: Decimal,
    #[serde(deserialize_with = "scalar::deserialize_u32")]
    pub quantity: u32,
    #[serde(rename = "options", default)]
    pub selected_options: Vec<SelectedOption>,
}

impl CartLine {
    /// `unit_price * quantity`, or `CartTotalsOverflow` when it does not fit.
    pub fn line_total(&self) -> Result<Decimal, DomainError> {
        self.unit_price.checked_mul(Decimal::from(self.quantity)).ok_or_else(|| self.overflow())
    }

    fn overflow(&self) -> DomainError {
        DomainError::CartTotalsOverflow { item_id: self.item_id, name: self.name.clone() }
    }
}

/// Loose wire shape of a cart, as emitted by the model in
/// `purchase_burger_items`. Totals are optional and never trusted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseInformation {
    #[serde(default)]
    pub items: Vec<CartLine>,
    #[serde(default)]
    pub total_price: Option<Decimal>,
    #[serde(default, deserialize_with = "scalar::deserialize_optional_u32")]
    pub total_items: Option<u32>,
    #[serde(default, deserialize_with = "scalar::deserialize_optional_u32")]
    pub total_quantity: Option<u32>,
}

impl PurchaseInformation {
    /// Whether every total the payload declares agrees with `cart`.
    pub fn declared_totals_match(&self, cart: &Cart) -> bool {
        self.total_price.map_or(true, |price| price == cart.total_price)
            && self.total_items.map_or(true, |items| items == cart.total_items)
            && self.total_quantity.map_or(true, |quantity| quantity == cart.total_quantity)
    }
}

/// Selected lines plus running totals for one session.
///
/// Serializes as `{items, total_price, total_items, total_quantity}` with
/// every scalar total rendered as a string. Deserialization goes through
/// [`PurchaseInformation`] and recomputes the totals from the lines.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PurchaseInformation")]
pub struct Cart {
    #[serde(rename = "items")]
    lines: Vec<CartLine>,
    #[serde(serialize_with = "scalar::serialize_display")]
    total_price: Decimal,
    #[serde(serialize_with = "scalar::serialize_display")]
    total_items: u32,
    #[serde(serialize_with = "scalar::serialize_display")]
    total_quantity: u32,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_lines(lines: Vec<CartLine>) -> Result<Self, DomainError> {
        let mut cart = Self::new();
        for line in lines {
            cart.add_line(line)?;
        }
        Ok(cart)
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn total_items(&self) -> u32 {
        self.total_items
    }

    pub fn total_quantity(&self) -> u32 {
        self.total_quantity
    }

    pub fn total_price(&self) -> Decimal {
        self.total_price
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Appends `line`. Nothing changes when a new total would overflow.
    pub fn add_line(&mut self, line: CartLine) -> Result<(), DomainError> {
        let total_items = self.total_items.checked_add(1).ok_or_else(|| line.overflow())?;
        let total_quantity =
            self.total_quantity.checked_add(line.quantity).ok_or_else(|| line.overflow())?;
        let total_price =
            self.total_price.checked_add(line.line_total()?).ok_or_else(|| line.overflow())?;

        self.total_items = total_items;
        self.total_quantity = total_quantity;
        self.total_price = total_price;
        self.lines.push(line);
        Ok(())
    }

    /// Removes the first line structurally equal to `line`. The cart is left
    /// untouched when nothing matches.
    pub fn remove_line(&mut self, line: &CartLine) -> Result<CartLine, DomainError> {
        let position =
            self.lines.iter().position(|candidate| candidate == line).ok_or_else(|| {
                DomainError::ItemNotFound { item_id: line.item_id, name: line.name.clone() }
            })?;

        let drifted = || {
            DomainError::InvariantViolation(format!(
                "cart totals smaller than line `{}` being removed",
                line.name
            ))
        };
        let total_items = self.total_items.checked_sub(1).ok_or_else(drifted)?;
        let total_quantity = self.total_quantity.checked_sub(line.quantity).ok_or_else(drifted)?;
        let total_price = self.total_price.checked_sub(line.line_total()?).ok_or_else(drifted)?;

        self.total_items = total_items;
        self.total_quantity = total_quantity;
        self.total_price = total_price;
        Ok(self.lines.remove(position))
    }

    pub fn verify_totals(&self) -> Result<(), DomainError> {
        let expected_items = self.lines.len() as u64;
        let expected_quantity: u64 = self.lines.iter().map(|line| u64::from(line.quantity)).sum();
        let expected_price = self.lines.iter().try_fold(Decimal::ZERO, |sum, line| {
            line.line_total().ok().and_then(|total| sum.checked_add(total))
        });

        if u64::from(self.total_items) != expected_items
            || u64::from(self.total_quantity) != expected_quantity
            || expected_price != Some(self.total_price)
        {
            return Err(DomainError::InvariantViolation(format!(
                "cart totals drifted: items {}/{expected_items}, quantity {}/{expected_quantity}, \
                 price {}/{expected_price:?}",
                self.total_items, self.total_quantity, self.total_price
            )));
        }
        Ok(())
    }
}

impl TryFrom<PurchaseInformation> for Cart {
    type Error = DomainError;

    fn try_from(value: PurchaseInformation) -> Result<Self, Self::Error> {
        Self::from_lines(value.items)
    }
}

mod scalar {
    use std::fmt::Display;

    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u64),
        Text(String),
    }

    impl NumberOrString {
        fn into_u32<E: serde::de::Error>(self) -> Result<u32, E> {
            match self {
                Self::Number(value) => u32::try_from(value).map_err(E::custom),
                Self::Text(value) => value.trim().parse::<u32>().map_err(E::custom),
            }
        }
    }

    pub fn serialize_display<S, T>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Display,
    {
        serializer.collect_str(value)
    }

    pub fn deserialize_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
    where
        D: Deserializer<'de>,
    {
        NumberOrString::deserialize(deserializer)?.into_u32::<D::Error>()
    }

    pub fn deserialize_optional_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<NumberOrString>::deserialize(deserializer)?
            .map(NumberOrString::into_u32::<D::Error>)
            .transpose()
    }
}
