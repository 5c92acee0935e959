// SPDX-License-Identifier: Apache-2.0

use crate::ids::{AssistantId, CaseId};

/// Instruction document resolution order: first existing path wins. The
/// conventions are fixed; resolution never falls through to anything else.
#[must_use]
pub fn instruction_candidates(case_id: &CaseId, assistant_id: &AssistantId) -> [String; 3] {
    [
        format!("public/markdown/{case_id}-{assistant_id}.md"),
        format!("public/demos/{case_id}/markdown/{assistant_id}.md"),
        format!("assistants/{assistant_id}.md"),
    ]
}
