use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

use super::API_PREFIX;

fn base_join(base: &str, path: &str) -> String {
    let b = base.trim_end_matches('/');
    let p = path.trim_start_matches('/');
    format!("{}/{}", b, p)
}

fn enc(s: &str) -> String {
    utf8_percent_encode(s, NON_ALPHANUMERIC).to_string()
}

fn with_phone(base: &str, path: &str, phone: &str) -> String {
    format!(
        "{}?phoneNumber={}",
        base_join(base, &format!("{}/{}", API_PREFIX, path)),
        enc(phone)
    )
}

pub fn medicines(base: &str, phone: &str) -> String {
    with_phone(base, "medicines", phone)
}

/// Body-carrying writes (POST/PUT) go to the bare collection path.
pub fn medicines_collection(base: &str) -> String {
    base_join(base, &format!("{}/medicines", API_PREFIX))
}

pub fn medicine_item(base: &str, phone: &str, id: i32) -> String {
    format!("{}&id={}", medicines(base, phone), id)
}

pub fn notifications(base: &str, phone: &str) -> String {
    with_phone(base, "notifications", phone)
}

pub fn notifications_collection(base: &str) -> String {
    base_join(base, &format!("{}/notifications", API_PREFIX))
}

pub fn notification_item(base: &str, phone: &str, id: i32) -> String {
    format!("{}&id={}", notifications(base, phone), id)
}

pub fn consumption(base: &str) -> String {
    base_join(base, &format!("{}/medicines/consumption", API_PREFIX))
}

pub fn consumption_stats(base: &str, phone: &str, medicine_id: Option<i32>) -> String {
    let url = with_phone(base, "medicines/consumption", phone);
    match medicine_id {
        Some(id) => format!("{}&medicineId={}", url, id),
        None => url,
    }
}

pub fn push_subscribe(base: &str) -> String {
    base_join(base, &format!("{}/push/subscriptions", API_PREFIX))
}

pub fn push_unsubscribe(base: &str) -> String {
    base_join(base, &format!("{}/push/subscriptions/unsubscribe", API_PREFIX))
}

pub fn cron_reminders(base: &str) -> String {
    base_join(base, &format!("{}/cron/reminders", API_PREFIX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_numbers_are_percent_encoded() {
        assert_eq!(
            medicines("http://h:1/", "+82 10"),
            "http://h:1/api/medicines?phoneNumber=%2B82%2010"
        );
        assert_eq!(
            consumption_stats("http://h", "010", Some(4)),
            "http://h/api/medicines/consumption?phoneNumber=010&medicineId=4"
        );
        assert_eq!(
            notification_item("http://h", "010", 9),
            "http://h/api/notifications?phoneNumber=010&id=9"
        );
    }
}
