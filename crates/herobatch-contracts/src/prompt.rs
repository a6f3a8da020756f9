use crate::records::normalize_cell;

/// Descriptions longer than this are cut before they reach the prompt.
pub const PROMPT_DESCRIPTION_MAX_CHARS: usize = 400;

/// Language of the text rendered onto the image unless the caller picks another.
pub const DEFAULT_COPY_LANGUAGE: &str = "Traditional Chinese (Taiwan)";

const UNNAMED_PRODUCT: &str = "(unnamed product)";
const NO_DESCRIPTION: &str = "(no description provided; rely on the product photo only)";

/// Builds the hero-image instruction for one product.
///
/// Pure function of its inputs: same inputs, same text, and never empty even
/// when every input is blank. A blank `copy_language` means the default.
pub fn build_image_prompt(name: &str, description: &str, copy_language: &str) -> String {
    let language = match copy_language.trim() {
        "" => DEFAULT_COPY_LANGUAGE,
        language => language,
    };
    let name = normalize_cell(name);
    let description = normalize_cell(description);
    let name = if name.is_empty() {
        UNNAMED_PRODUCT.to_string()
    } else {
        name
    };
    let short_description = if description.is_empty() {
        NO_DESCRIPTION.to_string()
    } else {
        description
            .chars()
            .take(PROMPT_DESCRIPTION_MAX_CHARS)
            .collect::<String>()
    };

    format!(
        "You are an e-commerce visual designer producing 1:1 hero images for marketplace listings.

You are given the original product photo. Use that photo as the subject and design one
square, eye-catching hero image with very little text.

[Layout]
- Top: one short headline; add a very short subheadline only if it is truly needed.
- Left middle: 2-3 stacked icon capsules, each with a very short label or no label at all.
- Center, slightly low: the product itself, large, on a clean scene background.
- Right: optionally one small magnifier bubble highlighting a key detail of the product.
- Bottom right: optionally one small tag with a few words, or nothing.

[Product photo rules]
- The supplied product photo must be the hero of the image.
- Do not change the product's shape, color or appearance, and never replace it.
- Background, lighting, composition, text and icons may change; keep the frame uncluttered.
- Keep the product centered or slightly below center, crisp and well lit.

[Background]
- A simple layered scene or gradient whose colors suit the product.
- Blurred context related to the product's use is fine, with little detail.
- The product and headline must stand out more than the background.

[Copy rules: keep text minimal]
0. Write every word on the image in {language}. Character limits below count
   {language} characters.
1. Headline: 4-8 characters, a phrase not a sentence, no punctuation, stating the core value.
2. Subheadline (optional): at most 10 characters; omit it if it cannot be that short.
3. Selling points: 2-3 items of 3-5 characters each, shown next to the icons.
4. All copy must come from the description below or a faithful shortening of it;
   never invent features or exaggerate claims.
5. Total text on the image: headline, optional subheadline, at most three short
   selling points. No paragraphs, specifications or brand stories.

[Product name] (for your understanding; it need not appear verbatim):
{name}

[Product description] (pick and shorten suitable copy from this):
{short_description}

Render the finished design directly as an image. Do not output any explanatory text.
"
    )
}
