use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{
    keys::Currency,
    units::{Px, Qty},
};

/// One point on the position's price/quantity timeline: the total quantity
/// after the event on `effective_date`, priced at the quantity-weighted
/// average of the open lots at that moment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub effective_date: NaiveDate,
    pub quantity: Qty,
    pub price: Px,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notional: Option<Decimal>,
}

/// Time-indexed price/quantity schedule. Kept ascending by effective date
/// with at most one entry per date; a same-date event overwrites its entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuantitySchedule {
    pub unit: String,
    pub currency: Currency,
    schedule: Vec<ScheduleEntry>,
}

impl PriceQuantitySchedule {
    pub fn new(unit: impl Into<String>, currency: Currency) -> Self {
        Self {
            unit: unit.into(),
            currency,
            schedule: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.schedule
    }

    pub fn len(&self) -> usize {
        self.schedule.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedule.is_empty()
    }

    pub fn entry_on(&self, date: NaiveDate) -> Option<&ScheduleEntry> {
        self.schedule
            .binary_search_by_key(&date, |e| e.effective_date)
            .ok()
            .map(|idx| &self.schedule[idx])
    }

    /// Inserts or overwrites the entry for the given date, preserving the
    /// ascending-by-date invariant.
    pub fn upsert(&mut self, entry: ScheduleEntry) {
        match self
            .schedule
            .binary_search_by_key(&entry.effective_date, |e| e.effective_date)
        {
            Ok(idx) => self.schedule[idx] = entry,
            Err(idx) => self.schedule.insert(idx, entry),
        }
    }

    pub fn last(&self) -> Option<&ScheduleEntry> {
        self.schedule.last()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn entry(d: u32, qty: Decimal, px: Decimal) -> ScheduleEntry {
        ScheduleEntry {
            effective_date: date(d),
            quantity: Qty(qty),
            price: Px(px),
            notional: None,
        }
    }

    fn schedule() -> PriceQuantitySchedule {
        PriceQuantitySchedule::new("SHARES", "USD".into())
    }

    #[test]
    fn test_out_of_order_upserts_stay_sorted() {
        let mut s = schedule();
        s.upsert(entry(20, dec!(1500), dec!(51.67)));
        s.upsert(entry(10, dec!(200), dec!(48.00)));
        s.upsert(entry(15, dec!(1000), dec!(50.00)));

        let dates: Vec<_> = s.entries().iter().map(|e| e.effective_date).collect();
        assert_eq!(dates, vec![date(10), date(15), date(20)]);
    }

    #[test]
    fn test_same_date_event_overwrites_its_entry() {
        let mut s = schedule();
        s.upsert(entry(15, dec!(1000), dec!(50.00)));
        s.upsert(entry(15, dec!(1500), dec!(51.67)));

        assert_eq!(s.len(), 1);
        assert_eq!(s.entry_on(date(15)).unwrap().quantity, Qty(dec!(1500)));
    }

    #[test]
    fn test_serializes_with_camel_case_and_string_decimals() {
        let mut s = schedule();
        let mut e = entry(15, dec!(1000), dec!(50.00));
        e.notional = Some(dec!(50000.00));
        s.upsert(e);

        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["unit"], "SHARES");
        assert_eq!(json["currency"], "USD");
        let first = &json["schedule"][0];
        assert_eq!(first["effectiveDate"], "2024-01-15");
        assert_eq!(first["quantity"], "1000");
        assert_eq!(first["price"], "50.00");
        assert_eq!(first["notional"], "50000.00");
    }

    #[test]
    fn test_notional_omitted_when_absent() {
        let mut s = schedule();
        s.upsert(entry(15, dec!(1000), dec!(50.00)));
        let json = serde_json::to_value(&s).unwrap();
        assert!(json["schedule"][0].get("notional").is_none());
    }
}
