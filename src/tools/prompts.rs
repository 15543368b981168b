//! 缺参时向用户提问的文案；未登记的参数名使用通用模板

/// 数值参数解析失败时的提示
pub const INVALID_NUMBER_PROMPT: &str = "Geçerli bir sayı giriniz.";

/// 参数名 -> 提问文案（总函数，任何名字都有结果）
pub fn parameter_prompt(name: &str) -> String {
    let known = match name {
        "campaign_id" => "Katılmak istediğiniz kampanyanın ID'sini giriniz: ",
        "service_type" => "Destek talebi hangi hizmetle ilgili? (ör. internet, fatura, hat): ",
        "description" => "Lütfen sorununuzu kısaca açıklayınız: ",
        "ticket_id" => "Destek talebi numaranızı giriniz: ",
        "method" => "Ödeme yöntemini seçiniz (kredi kartı / havale / mobil ödeme): ",
        "package_name" => "Paket adını giriniz: ",
        "reason" => "Fatura itirazınızın nedenini yazınız: ",
        "package_type" => "Hangi tür ek paket almak istersiniz? (internet / sms / dakika / her şey dahil): ",
        "package_id" => "Geçmek istediğiniz paketin ID'sini giriniz: ",
        "feedback_text" => "Geri bildiriminizi yazınız: ",
        "rating" => "Hizmetimizi 1 ile 5 arasında puanlayınız: ",
        "month" => "Hangi aydaki fatura bilginizi öğrenmek istersiniz? (YYYY-AA): ",
        "user_id" => "Kullanıcı numaranızı giriniz: ",
        "amount" => "Ödemek istediğiniz tutarı giriniz (TL): ",
        "quantity" => "Kaç adet almak istersiniz? (sayı olarak): ",
        _ => return format!("Lütfen '{}' bilgisini giriniz: ", name),
    };
    known.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_and_unknown_prompts() {
        assert!(parameter_prompt("amount").contains("tutar"));
        assert_eq!(
            parameter_prompt("iban"),
            "Lütfen 'iban' bilgisini giriniz: "
        );
    }
}
