//! Page model of the customer portal: paths and CSS selectors the
//! connector relies on.

pub const HOME_PATH: &str = "/home.html";
pub const BILLS_PATH: &str = "/home/espace-client/vos-factures-et-correspondances.html";
pub const PROFILE_PATH: &str = "/home/espace-client/gestion-du-compte.html";

/// Rows shown before "load more" has been clicked.
pub const BASELINE_PAGE_SIZE: usize = 4;

pub const VENDOR: &str = "veolia";

pub const LOGIN_FORM: &str = "#loginBoxform_identification";
pub const LOGIN_USERNAME: &str = "#loginBoxform_identification input[name='veolia_username']";
pub const LOGIN_PASSWORD: &str = "#loginBoxform_identification input[name='veolia_password']";
pub const LOGIN_ERROR: &str = ".error";

pub const CAPTCHA_TRIGGER: &str = "#loginBoxform_identification .frc-button";
pub const CAPTCHA_SOLUTION: &str = "#loginBoxform_identification input.frc-captcha-solution";

/// Present only while a session is active; wraps the disconnect control.
pub const LOGGED_IN_MARKER: &str = ".block-deconnecte";
pub const DISCONNECT: &str = ".block-deconnecte a";

pub const BILLS_LINK: &str = "a[href$='vos-factures-et-correspondances.html']";
pub const CONTRACT_LINKS: &str = ".divToggle ul li a";
pub const CONTRACT_REF: &str = ".liste-table .ref-contrat";
pub const RESULTS_TABLE: &str = ".liste-table table";
pub const RESULT_ROWS: &str = ".liste-table table tbody tr";
pub const LOAD_MORE: &str = ".liste-table a.voir-plus";

pub const PROFILE_CONTACT: &str = "#bloc-infos-personnelles";
pub const PROFILE_ADDRESS: &str = "#bloc-adresse";

pub fn url(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}
