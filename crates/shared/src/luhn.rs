//! Luhn 校验
//!
//! 订单号由提交流程按 Luhn 算法校验，对账侧仅用于告警和测试数据生成。

/// 校验数字串是否满足 Luhn 算法
///
/// 空串或包含非 ASCII 数字字符时返回 false
pub fn is_valid(number: &str) -> bool {
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    checksum(number.bytes().rev(), false) % 10 == 0
}

/// 计算使 `payload` 成为合法 Luhn 数字串的校验位
pub fn check_digit(payload: &str) -> Option<u8> {
    if payload.is_empty() || !payload.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // 追加校验位后，payload 的最后一位处在需要加倍的位置
    let sum = checksum(payload.bytes().rev(), true);
    Some(((10 - sum % 10) % 10) as u8)
}

/// 从最低位开始累加，`double_first` 决定最低位是否加倍
fn checksum(digits_from_right: impl Iterator<Item = u8>, double_first: bool) -> u32 {
    digits_from_right
        .enumerate()
        .map(|(idx, b)| {
            let digit = u32::from(b - b'0');
            let doubled = (idx % 2 == 0) == double_first;
            if doubled {
                let d = digit * 2;
                if d > 9 { d - 9 } else { d }
            } else {
                digit
            }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_numbers() {
        assert!(is_valid("4561261212345467"));
        assert!(is_valid("79927398713"));
        assert!(is_valid("0"));
    }

    #[test]
    fn test_invalid_numbers() {
        assert!(!is_valid("4561261212345464"));
        assert!(!is_valid("111"));
        assert!(!is_valid(""));
        assert!(!is_valid("12a4"));
        assert!(!is_valid(" 79927398713"));
    }

    #[test]
    fn test_check_digit() {
        assert_eq!(check_digit("7992739871"), Some(3));
        assert_eq!(check_digit("456126121234546"), Some(7));
        assert_eq!(check_digit(""), None);
        assert_eq!(check_digit("12x"), None);

        let payload = "12345678";
        let digit = check_digit(payload).unwrap();
        assert!(is_valid(&format!("{payload}{digit}")));
    }
}
