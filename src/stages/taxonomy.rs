//! The fixed tag taxonomy used for page tagging and scoring.
//!
//! Eight scored tags plus `other`. Tag numbers match the `no` field of the
//! initiative catalog's target categories. Evaluation items read
//! `"Topic: question"`; the topic doubles as the item's short name.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    pub no: u8,
    pub key: &'static str,
    pub label: &'static str,
    /// Keywords shown to the tagging model.
    pub hint: &'static str,
    pub items: &'static [&'static str],
}

pub const OTHER_TAG: &str = "other";
pub const MANAGEMENT_TAG: &str = "management_strategy";
pub const BUSINESS_TAG: &str = "business_sales";
pub const HUMAN_CAPITAL_TAG: &str = "human_capital";
pub const FINANCE_TAG: &str = "finance_governance";

pub const TAGS: &[Tag] = &[
    Tag {
        no: 1,
        key: MANAGEMENT_TAG,
        label: "Management strategy and mid-term vision",
        hint: "philosophy, purpose, mid-term plan, management issues, priority themes, KPIs and targets",
        items: &[
            "Purpose: Is the corporate philosophy or purpose stated in a way that is tied to business activities and decisions?",
            "Mid-term targets: Does the mid-term plan set concrete numeric targets for revenue, profit, ROE and similar?",
            "Mid-term measures: Does the mid-term plan name execution measures such as growth investment, cost structure and people initiatives?",
            "Issue recognition: Is the stated view of management issues consistent with the financial position (margins, cash flow, financial safety)?",
            "KPI monitoring: Is there an approach to tracking and monitoring progress against KPIs?",
        ],
    },
    Tag {
        no: 2,
        key: BUSINESS_TAG,
        label: "Business, sales and order strategy",
        hint: "business portfolio, segments, public/private mix, proposal sales, selective ordering, customer profile",
        items: &[
            "Portfolio: Is the role of core, growth and stable businesses clearly positioned?",
            "Order policy: Does the order policy show selective acceptance that is conscious of margin and cost ratio?",
            "Customer strengths: Are the company's strengths with its customers and projects organised from a profitability point of view?",
            "Business mix: Does the public/private business mix take revenue stability and risk diversification into account?",
        ],
    },
    Tag {
        no: 3,
        key: "productivity_operations",
        label: "Productivity and site operations",
        hint: "delivery structure, cost control, value engineering, BIM/CIM, ICT on site, site DX",
        items: &[
            "Cost control: Are cost and project margin controls linked to margin improvement?",
            "Delivery structure: Does the delivery structure address staffing constraints and productivity?",
            "Method improvement: Do method improvements and value engineering contribute to cost reduction or added value?",
            "Site DX: Are the productivity or schedule effects of ICT and site digitalisation shown?",
        ],
    },
    Tag {
        no: 4,
        key: HUMAN_CAPITAL_TAG,
        label: "Human capital and organisation",
        hint: "hiring and retention, training, pay, diversity, working-style reform and overtime limits",
        items: &[
            "Hiring and retention: Are hiring and retention issues recognised in relation to growth and productivity?",
            "Development: Is staff development positioned as a driver of long-term competitiveness?",
            "Personnel cost: Is personnel cost balanced against the personnel cost ratio and value added?",
            "Working hours: Does the response to working-style reform and overtime limits consider profitability and site operations?",
            "Organisation: Is decision making being accelerated and are roles clearly assigned?",
        ],
    },
    Tag {
        no: 5,
        key: "technology_dx",
        label: "Technology, DX and R&D",
        hint: "DX organisation, in-house systems, technical differentiation, research themes",
        items: &[
            "Technology: Is technical capability framed as a competitive advantage that lifts growth or margins?",
            "DX: Are quantitative effects of digitalisation such as efficiency or cost reduction considered?",
            "R&D: Are research themes connected to future business expansion or differentiation?",
        ],
    },
    Tag {
        no: 6,
        key: "sustainability",
        label: "Sustainability and social responsibility",
        hint: "decarbonisation, health and safety, human rights, community contribution, TCFD and ESG metrics",
        items: &[
            "Safety: Are health, safety and working conditions addressed from a business continuity and retention point of view?",
            "Decarbonisation: Are the cost, investment and competitive effects of decarbonisation organised?",
            "ESG: Is ESG work related to risk management and enterprise value?",
        ],
    },
    Tag {
        no: 7,
        key: FINANCE_TAG,
        label: "Finance, capital policy and governance",
        hint: "key metrics, financial position analysis, cash flow analysis, dividends, governance, internal control, shares",
        items: &[
            "Profitability: Are structural strengths and weaknesses in margins recognised in light of the cost and SG&A ratios? [gross margin, cost ratio, SG&A ratio, operating margin]",
            "Capital efficiency: Is ROE and ROA explained in relation to profit levels and the business model? [ROE, ROA, net margin]",
            "Value added: Is the productivity gap against personnel cost recognised? [value added, personnel cost ratio, gross margin]",
            "Cash generation: Is operating cash flow generated consistently with profit and EBITDA? [operating CF margin, operating CF / EBITDA, EBITDA]",
            "Free cash flow: Is free cash flow sufficient to fund growth and capital investment? [free cash flow, operating CF]",
            "Financial safety: Do the equity ratio and debt levels match the business risk? [equity ratio, D/E ratio, current ratio]",
            "Working capital: Do working capital and collection terms weigh on cash flow? [operating CF margin, current ratio]",
            "Governance: Are capital policy and oversight consistent with the financial position and long-term strategy? [equity ratio, ROE, D/E ratio, free cash flow]",
        ],
    },
    Tag {
        no: 8,
        key: "risk_compliance",
        label: "Risk management and compliance",
        hint: "market and price risk, people risk, disasters and BCP, regulation, information security",
        items: &[
            "Key risks: Are the main risks organised by their financial impact on profit, cash flow and assets?",
            "BCP: Is disaster and business continuity planning adequate for continuity and financial stability?",
            "People risk: Is the impact of people and labour risks on growth recognised?",
        ],
    },
];

pub fn find(key: &str) -> Option<&'static Tag> {
    TAGS.iter().find(|tag| tag.key == key)
}

pub fn by_no(no: u64) -> Option<&'static Tag> {
    TAGS.iter().find(|tag| u64::from(tag.no) == no)
}

/// Map a model-supplied tag onto the taxonomy, folding unknowns into `other`.
pub fn normalize(raw: &str) -> &'static str {
    let wanted = raw.trim().to_ascii_lowercase();
    let wanted = wanted.split('(').next().unwrap_or_default().trim();
    if let Some(tag) = TAGS
        .iter()
        .find(|tag| tag.key == wanted || tag.label.eq_ignore_ascii_case(wanted))
    {
        return tag.key;
    }
    match wanted.parse::<u64>().ok().and_then(by_no) {
        Some(tag) => tag.key,
        None => OTHER_TAG,
    }
}

/// Position of a tag in taxonomy order, `other` last.
pub fn order_of(key: &str) -> usize {
    TAGS.iter()
        .position(|tag| tag.key == key)
        .unwrap_or(TAGS.len())
}

pub fn short_item_name(item: &str) -> &str {
    match item.split_once(':') {
        Some((topic, _)) if !topic.trim().is_empty() => topic.trim(),
        _ => item.trim(),
    }
}
