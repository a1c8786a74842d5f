use super::{FieldKind, FieldSpec, ServiceDefinition};

pub const BIRTH_CERTIFICATE: &str = "birth-certificate";

const GENDERS: &[&str] = &["Male", "Female"];

fn field(name: &str, label: &str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name: name.to_string(),
        label: label.to_string(),
        kind,
        required: true,
        options: Vec::new(),
    }
}

fn text(name: &str, label: &str) -> FieldSpec {
    field(name, label, FieldKind::ShortText)
}

fn date(name: &str, label: &str) -> FieldSpec {
    field(name, label, FieldKind::Date)
}

fn select(name: &str, label: &str, options: &[&str]) -> FieldSpec {
    FieldSpec {
        options: options.iter().map(|o| o.to_string()).collect(),
        ..field(name, label, FieldKind::SingleSelect)
    }
}

fn service(key: &str, display_name: &str, unit_price: i64, fields: Vec<FieldSpec>) -> ServiceDefinition {
    ServiceDefinition {
        key: key.to_string(),
        display_name: display_name.to_string(),
        unit_price,
        fields,
    }
}

/// The services offered by the portal, in display order.
pub(super) fn definitions() -> Vec<ServiceDefinition> {
    vec![
        service(
            BIRTH_CERTIFICATE,
            "Birth Certificate",
            5000,
            vec![
                text("fullName", "Full Name"),
                text("nin", "National Identification Number (NIN)"),
                date("dateOfBirth", "Date of Birth"),
                select("gender", "Gender", GENDERS),
                text("placeOfBirth", "Place of Birth"),
                text("fatherName", "Father's Name"),
                text("motherName", "Mother's Name"),
                text("fatherOccupation", "Father's Occupation"),
                text("motherOccupation", "Mother's Occupation"),
                text("address", "Residential Address"),
                text("stateOfOrigin", "State of Origin"),
                text("lga", "Local Government Area"),
            ],
        ),
        service(
            "tax-receipt",
            "Tax Receipt",
            2000,
            vec![
                text("fullName", "Full Name"),
                text("taxId", "Tax ID"),
                field("amount", "Amount Paid", FieldKind::Number),
                date("paymentDate", "Payment Date"),
                text("paymentPurpose", "Payment Purpose"),
            ],
        ),
        service(
            "marriage-certificate",
            "Marriage Certificate",
            10000,
            vec![
                text("husbandName", "Husband's Full Name"),
                text("wifeName", "Wife's Full Name"),
                text("husbandNin", "Husband's NIN"),
                text("wifeNin", "Wife's NIN"),
                date("marriageDate", "Date of Marriage"),
                text("marriageVenue", "Marriage Venue"),
                text("witness1", "First Witness Name"),
                text("witness2", "Second Witness Name"),
            ],
        ),
        service(
            "death-certificate",
            "Death Certificate",
            3000,
            vec![
                text("deceasedName", "Deceased Full Name"),
                date("dateOfDeath", "Date of Death"),
                text("placeOfDeath", "Place of Death"),
                text("causeOfDeath", "Cause of Death"),
                text("informantName", "Informant's Name"),
                text("informantRelationship", "Relationship to Deceased"),
            ],
        ),
        service(
            "business-registration",
            "Business Registration",
            25000,
            vec![
                text("businessName", "Business Name"),
                select(
                    "businessType",
                    "Business Type",
                    &["Sole Proprietorship", "Partnership", "Limited Liability Company"],
                ),
                text("registrationNumber", "Registration Number"),
                text("ownerName", "Owner's Name"),
                text("ownerNin", "Owner's NIN"),
                text("businessAddress", "Business Address"),
                date("registrationDate", "Registration Date"),
            ],
        ),
        service(
            "passport-application",
            "Passport Application",
            35000,
            vec![
                text("fullName", "Full Name"),
                text("nin", "NIN"),
                date("dateOfBirth", "Date of Birth"),
                select("gender", "Gender", GENDERS),
                select("passportType", "Passport Type", &["Standard", "Official", "Diplomatic"]),
                text("address", "Current Address"),
                text("emergencyContact", "Emergency Contact"),
            ],
        ),
        service(
            "driver-license-renewal",
            "Driver's License Renewal",
            15000,
            vec![
                text("fullName", "Full Name"),
                text("licenseNumber", "Current License Number"),
                date("expiryDate", "Current License Expiry Date"),
                text("address", "Current Address"),
                field("phoneNumber", "Phone Number", FieldKind::Phone),
                select(
                    "bloodGroup",
                    "Blood Group",
                    &["A+", "A-", "B+", "B-", "AB+", "AB-", "O+", "O-"],
                ),
            ],
        ),
    ]
}
