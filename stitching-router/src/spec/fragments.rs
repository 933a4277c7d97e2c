use std::collections::HashMap;

use apollo_compiler::executable;

use crate::json_ext::Object;
use crate::spec::Selection;
use crate::spec::SpecError;

#[derive(Debug, Default)]
pub(crate) struct Fragments {
    map: HashMap<String, Fragment>,
}

#[derive(Debug)]
pub(crate) struct Fragment {
    pub(crate) type_condition: String,
    pub(crate) selection_set: Vec<Selection>,
}

impl Fragments {
    pub(crate) fn from_executable(
        document: &executable::ExecutableDocument,
        variables: &Object,
    ) -> Result<Self, SpecError> {
        let map = document
            .fragments
            .iter()
            .map(|(name, fragment)| {
                let selection_set = fragment
                    .selection_set
                    .selections
                    .iter()
                    .filter_map(|selection| Selection::from_executable(selection, variables, 0).transpose())
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((
                    name.as_str().to_string(),
                    Fragment {
                        type_condition: fragment.type_condition().as_str().to_string(),
                        selection_set,
                    },
                ))
            })
            .collect::<Result<HashMap<_, _>, SpecError>>()?;
        Ok(Fragments { map })
    }

    pub(crate) fn get(&self, key: &str) -> Option<&Fragment> {
        self.map.get(key)
    }
}
